//! Mail, calendar, and document capabilities backed by the Google APIs.
//!
//! Every function validates its arguments before any network call, borrows
//! an access token from the credential manager, and returns either a
//! formatted human-readable reply or a classified failure.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;

use crate::{
    classify_http, is_valid_email, parse_naive_datetime, ToolFailure, ToolReply,
};

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3/calendars/primary/events";
const DOCS_API: &str = "https://docs.googleapis.com/v1/documents";

const SEARCH_DEFAULT_RESULTS: usize = 10;
const SEARCH_MAX_RESULTS: usize = 25;
const EVENTS_DEFAULT_RESULTS: usize = 50;

fn http_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(15))
        .timeout_read(Duration::from_secs(30))
        .timeout_write(Duration::from_secs(30))
        .build()
}

fn get_json(
    op: &str,
    request: ureq::Request,
) -> Result<serde_json::Value, ToolFailure> {
    match request.call() {
        Ok(resp) => resp
            .into_json()
            .map_err(|e| ToolFailure::upstream(format!("{op}: response decode failed: {e}"))),
        Err(ureq::Error::Status(code, resp)) => {
            let text = resp.into_string().unwrap_or_default();
            Err(classify_http(op, code, &text))
        }
        Err(err) => Err(ToolFailure::upstream(format!("{op}: request failed: {err}"))),
    }
}

fn post_json(
    op: &str,
    request: ureq::Request,
    payload: serde_json::Value,
) -> Result<serde_json::Value, ToolFailure> {
    match request.send_json(payload) {
        Ok(resp) => resp
            .into_json()
            .map_err(|e| ToolFailure::upstream(format!("{op}: response decode failed: {e}"))),
        Err(ureq::Error::Status(code, resp)) => {
            let text = resp.into_string().unwrap_or_default();
            Err(classify_http(op, code, &text))
        }
        Err(err) => Err(ToolFailure::upstream(format!("{op}: request failed: {err}"))),
    }
}

/// Interpret a naive model-supplied timestamp in the configured zone.
pub(crate) fn localize(value: &str, tz: Tz, field: &str) -> Result<DateTime<Tz>, ToolFailure> {
    let naive = parse_naive_datetime(value).ok_or_else(|| {
        ToolFailure::invalid_argument(format!(
            "{field} must be a timestamp like 2026-03-01T09:30, got '{value}'"
        ))
    })?;
    tz.from_local_datetime(&naive).earliest().ok_or_else(|| {
        ToolFailure::invalid_argument(format!("{field} '{value}' does not exist in zone {tz}"))
    })
}

// ── Mail ────────────────────────────────────────────────────────────────

/// RFC 2822 plain-text message, base64url-encoded the way the Gmail API
/// expects its `raw` payload.
pub(crate) fn build_raw_message(
    sender: Option<&str>,
    to: &[String],
    subject: &str,
    body: &str,
) -> String {
    let mut message = String::new();
    if let Some(sender) = sender {
        message.push_str(&format!("From: {sender}\r\n"));
    }
    message.push_str(&format!("To: {}\r\n", to.join(", ")));
    message.push_str(&format!("Subject: {subject}\r\n"));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    message.push_str("\r\n");
    message.push_str(body);
    URL_SAFE_NO_PAD.encode(message.as_bytes())
}

pub(crate) fn send_email(
    token: &str,
    sender: Option<&str>,
    to: &[String],
    subject: &str,
    body: &str,
) -> Result<ToolReply, ToolFailure> {
    if to.is_empty() {
        return Err(ToolFailure::invalid_argument("at least one recipient is required"));
    }
    if subject.trim().is_empty() {
        return Err(ToolFailure::invalid_argument("subject must not be empty"));
    }
    let invalid: Vec<&String> = to.iter().filter(|a| !is_valid_email(a)).collect();
    if !invalid.is_empty() {
        let list = invalid.iter().map(|a| a.as_str()).collect::<Vec<_>>().join(", ");
        return Err(ToolFailure::invalid_argument(format!(
            "not valid email addresses: {list}"
        )));
    }

    let raw = build_raw_message(sender, to, subject, body);
    let value = post_json(
        "send_email",
        http_agent()
            .post(&format!("{GMAIL_API}/messages/send"))
            .set("authorization", &format!("Bearer {token}")),
        serde_json::json!({ "raw": raw }),
    )?;
    let id = value.get("id").and_then(|v| v.as_str()).unwrap_or("unknown");
    Ok(ToolReply::with_details(
        format!("Email sent to {} (message id {id}).", to.join(", ")),
        serde_json::json!({ "message_id": id, "recipients": to }),
    ))
}

pub(crate) fn search_email(
    token: &str,
    query: &str,
    max_results: Option<usize>,
) -> Result<ToolReply, ToolFailure> {
    if query.trim().is_empty() {
        return Err(ToolFailure::invalid_argument("search query must not be empty"));
    }
    let limit = max_results
        .unwrap_or(SEARCH_DEFAULT_RESULTS)
        .clamp(1, SEARCH_MAX_RESULTS);

    let agent = http_agent();
    let value = get_json(
        "search_email",
        agent
            .get(&format!("{GMAIL_API}/messages"))
            .query("q", query)
            .query("maxResults", &limit.to_string())
            .set("authorization", &format!("Bearer {token}")),
    )?;

    let ids: Vec<String> = value
        .get("messages")
        .and_then(|v| v.as_array())
        .map(|msgs| {
            msgs.iter()
                .filter_map(|m| m.get("id").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();
    if ids.is_empty() {
        return Err(ToolFailure::not_found(format!("No messages matched query '{query}'.")));
    }

    let mut lines = vec![format!("Found {} message(s) for '{query}':", ids.len())];
    for (idx, id) in ids.iter().enumerate() {
        let detail = get_json(
            "search_email",
            agent
                .get(&format!("{GMAIL_API}/messages/{id}"))
                .query("format", "metadata")
                .query("metadataHeaders", "Subject")
                .query("metadataHeaders", "From")
                .query("metadataHeaders", "Date")
                .set("authorization", &format!("Bearer {token}")),
        )?;
        lines.push(format_message_summary(idx + 1, &detail));
    }

    Ok(ToolReply::with_details(
        lines.join("\n"),
        serde_json::json!({ "count": ids.len(), "query": query }),
    ))
}

fn header_value<'a>(detail: &'a serde_json::Value, name: &str) -> &'a str {
    detail
        .get("payload")
        .and_then(|p| p.get("headers"))
        .and_then(|h| h.as_array())
        .and_then(|headers| {
            headers
                .iter()
                .find(|h| h.get("name").and_then(|n| n.as_str()) == Some(name))
        })
        .and_then(|h| h.get("value").and_then(|v| v.as_str()))
        .unwrap_or("(unknown)")
}

pub(crate) fn format_message_summary(rank: usize, detail: &serde_json::Value) -> String {
    let snippet = detail.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
    format!(
        "{rank}. From: {}\n   Subject: {}\n   Date: {}\n   {}",
        header_value(detail, "From"),
        header_value(detail, "Subject"),
        header_value(detail, "Date"),
        snippet
    )
}

// ── Calendar ────────────────────────────────────────────────────────────

/// Partition attendee addresses into syntactically valid and invalid sets.
/// The event is created with the valid set; the invalid set is reported
/// back distinctly, never silently dropped.
pub(crate) fn split_attendees(attendees: &[String]) -> (Vec<String>, Vec<String>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for addr in attendees {
        let trimmed = addr.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        if is_valid_email(&trimmed) {
            valid.push(trimmed);
        } else {
            invalid.push(trimmed);
        }
    }
    (valid, invalid)
}

pub(crate) fn booking_reply_text(
    link: &str,
    summary: &str,
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
    accepted: &[String],
    rejected: &[String],
) -> String {
    let mut text = format!(
        "Event created: {summary}\nStart: {}\nEnd: {}\nLink: {link}",
        start.format("%Y-%m-%d %H:%M %Z"),
        end.format("%Y-%m-%d %H:%M %Z"),
    );
    if !accepted.is_empty() {
        text.push_str(&format!(
            "\nAttendees invited ({}): {}",
            accepted.len(),
            accepted.join(", ")
        ));
    }
    if !rejected.is_empty() {
        text.push_str(&format!(
            "\nRejected addresses ({}): {} (not valid email addresses — the event was created without them)",
            rejected.len(),
            rejected.join(", ")
        ));
    }
    text
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn create_booking_event(
    token: &str,
    tz: Tz,
    summary: &str,
    description: Option<&str>,
    start_time: &str,
    end_time: &str,
    attendees: &[String],
) -> Result<ToolReply, ToolFailure> {
    if summary.trim().is_empty() {
        return Err(ToolFailure::invalid_argument("event summary must not be empty"));
    }
    let start = localize(start_time, tz, "start_time")?;
    let end = localize(end_time, tz, "end_time")?;
    if start >= end {
        return Err(ToolFailure::invalid_argument(format!(
            "start_time ({start_time}) must be before end_time ({end_time})"
        )));
    }
    let (accepted, rejected) = split_attendees(attendees);

    let payload = serde_json::json!({
        "summary": summary,
        "description": description.unwrap_or(""),
        "start": { "dateTime": start.to_rfc3339(), "timeZone": tz.name() },
        "end": { "dateTime": end.to_rfc3339(), "timeZone": tz.name() },
        "attendees": accepted.iter().map(|a| serde_json::json!({ "email": a })).collect::<Vec<_>>(),
    });
    let value = post_json(
        "create_booking_event",
        http_agent()
            .post(CALENDAR_API)
            .set("authorization", &format!("Bearer {token}")),
        payload,
    )?;
    let link = value
        .get("htmlLink")
        .and_then(|v| v.as_str())
        .unwrap_or("(no link returned)");

    let status = if rejected.is_empty() { "ok" } else { "partial" };
    Ok(ToolReply::with_details(
        booking_reply_text(link, summary, &start, &end, &accepted, &rejected),
        serde_json::json!({
            "status": status,
            "accepted": accepted,
            "rejected": rejected,
            "link": link,
        }),
    ))
}

pub(crate) fn read_calendar_events(
    token: &str,
    tz: Tz,
    start_time: &str,
    end_time: &str,
    max_results: Option<usize>,
) -> Result<ToolReply, ToolFailure> {
    let start = localize(start_time, tz, "start_time")?;
    let end = localize(end_time, tz, "end_time")?;
    if start >= end {
        return Err(ToolFailure::invalid_argument(format!(
            "start_time ({start_time}) must be before end_time ({end_time})"
        )));
    }
    let limit = max_results.unwrap_or(EVENTS_DEFAULT_RESULTS).clamp(1, 250);

    let value = get_json(
        "read_calendar_events",
        http_agent()
            .get(CALENDAR_API)
            .query("timeMin", &start.to_rfc3339())
            .query("timeMax", &end.to_rfc3339())
            .query("singleEvents", "true")
            .query("orderBy", "startTime")
            .query("maxResults", &limit.to_string())
            .set("authorization", &format!("Bearer {token}")),
    )?;

    let range = format!(
        "{} and {}",
        start.format("%Y-%m-%d %H:%M"),
        end.format("%Y-%m-%d %H:%M")
    );
    let text = format_event_list(&value, &range);
    let count = value
        .get("items")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);
    Ok(ToolReply::with_details(text, serde_json::json!({ "count": count })))
}

/// Render the event list response. An empty range is a defined, explicit
/// "no events" reply, not an empty string.
pub(crate) fn format_event_list(value: &serde_json::Value, range: &str) -> String {
    let items = value
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if items.is_empty() {
        return format!("No events found between {range}.");
    }

    fn event_time<'a>(event: &'a serde_json::Value, key: &str) -> &'a str {
        event
            .get(key)
            .and_then(|t| t.get("dateTime").or_else(|| t.get("date")))
            .and_then(|v| v.as_str())
            .unwrap_or("(unknown)")
    }

    let mut lines = vec![format!("Found {} event(s) between {range}:", items.len())];
    for (idx, event) in items.iter().enumerate() {
        let summary = event
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("(no title)");
        let mut line = format!(
            "{}. {summary}\n   Start: {}  End: {}",
            idx + 1,
            event_time(event, "start"),
            event_time(event, "end")
        );
        if let Some(location) = event.get("location").and_then(|v| v.as_str()) {
            line.push_str(&format!("\n   Location: {location}"));
        }
        if let Some(attendees) = event.get("attendees").and_then(|v| v.as_array()) {
            let emails: Vec<&str> = attendees
                .iter()
                .filter_map(|a| a.get("email").and_then(|v| v.as_str()))
                .collect();
            if !emails.is_empty() {
                line.push_str(&format!("\n   Attendees: {}", emails.join(", ")));
            }
        }
        lines.push(line);
    }
    lines.join("\n")
}

// ── Documents ───────────────────────────────────────────────────────────

pub(crate) fn create_drive_document(
    token: &str,
    title: &str,
    content: &str,
) -> Result<ToolReply, ToolFailure> {
    if title.trim().is_empty() {
        return Err(ToolFailure::invalid_argument("document title must not be empty"));
    }
    if content.trim().is_empty() {
        return Err(ToolFailure::invalid_argument("document content must not be empty"));
    }

    let agent = http_agent();
    let created = post_json(
        "create_drive_document",
        agent
            .post(DOCS_API)
            .set("authorization", &format!("Bearer {token}")),
        serde_json::json!({ "title": title }),
    )?;
    let doc_id = created
        .get("documentId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolFailure::upstream("create_drive_document: response missing documentId"))?
        .to_string();

    // Second step inserts the body text at the start of the new document.
    post_json(
        "create_drive_document",
        agent
            .post(&format!("{DOCS_API}/{doc_id}:batchUpdate"))
            .set("authorization", &format!("Bearer {token}")),
        serde_json::json!({
            "requests": [{
                "insertText": { "location": { "index": 1 }, "text": content }
            }]
        }),
    )?;

    let url = format!("https://docs.google.com/document/d/{doc_id}/edit");
    Ok(ToolReply::with_details(
        format!("Document created: {url}"),
        serde_json::json!({ "document_id": doc_id, "url": url }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[test]
    fn test_build_raw_message_is_base64url() {
        let raw = build_raw_message(
            Some("me@example.com"),
            &["ana@example.com".into(), "ben@example.com".into()],
            "Quarterly review",
            "See you at 3pm.\n",
        );
        assert!(!raw.contains('+') && !raw.contains('/') && !raw.contains('='));
        let decoded = URL_SAFE_NO_PAD.decode(raw.as_bytes()).unwrap();
        let text = String::from_utf8(decoded).unwrap();
        assert!(text.contains("To: ana@example.com, ben@example.com\r\n"));
        assert!(text.contains("Subject: Quarterly review\r\n"));
        assert!(text.ends_with("See you at 3pm.\n"));
    }

    #[test]
    fn test_send_email_rejects_invalid_recipients_before_network() {
        let err = send_email(
            "token",
            None,
            &["good@example.com".into(), "not-an-address".into()],
            "hello",
            "body",
        )
        .unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidArgument);
        assert!(err.message.contains("not-an-address"));
    }

    #[test]
    fn test_split_attendees_reports_both_sets() {
        let attendees = vec![
            "ana@example.com".to_string(),
            "ben@example.com".to_string(),
            "charlie-at-example".to_string(),
        ];
        let (valid, invalid) = split_attendees(&attendees);
        assert_eq!(valid.len(), 2);
        assert_eq!(invalid, vec!["charlie-at-example".to_string()]);
    }

    #[test]
    fn test_booking_reply_lists_accepted_and_rejected() {
        let tz = chrono_tz::UTC;
        let start = localize("2026-03-01T09:00", tz, "start_time").unwrap();
        let end = localize("2026-03-01T10:00", tz, "end_time").unwrap();
        let text = booking_reply_text(
            "https://calendar.example/evt",
            "Planning",
            &start,
            &end,
            &["ana@example.com".into(), "ben@example.com".into()],
            &["charlie-at-example".into()],
        );
        assert!(text.contains("Attendees invited (2): ana@example.com, ben@example.com"));
        assert!(text.contains("Rejected addresses (1): charlie-at-example"));
    }

    #[test]
    fn test_create_event_requires_ordered_times() {
        let err = create_booking_event(
            "token",
            chrono_tz::UTC,
            "Backwards",
            None,
            "2026-03-01T10:00",
            "2026-03-01T09:00",
            &[],
        )
        .unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidArgument);
        assert!(err.message.contains("before"));
    }

    #[test]
    fn test_localize_rejects_unparseable_input() {
        let err = localize("next tuesday", chrono_tz::UTC, "start_time").unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidArgument);
    }

    #[test]
    fn test_format_event_list_empty_is_explicit() {
        let value = serde_json::json!({ "items": [] });
        let text = format_event_list(&value, "2026-03-01 00:00 and 2026-03-01 23:59");
        assert_eq!(text, "No events found between 2026-03-01 00:00 and 2026-03-01 23:59.");
    }

    #[test]
    fn test_format_event_list_renders_details() {
        let value = serde_json::json!({
            "items": [{
                "summary": "Design sync",
                "start": { "dateTime": "2026-03-01T09:00:00-08:00" },
                "end": { "dateTime": "2026-03-01T09:30:00-08:00" },
                "location": "Room 4",
                "attendees": [{ "email": "ana@example.com" }]
            }]
        });
        let text = format_event_list(&value, "range");
        assert!(text.contains("1. Design sync"));
        assert!(text.contains("Room 4"));
        assert!(text.contains("ana@example.com"));
    }

    #[test]
    fn test_format_message_summary_pulls_headers() {
        let detail = serde_json::json!({
            "snippet": "lunch on thursday?",
            "payload": { "headers": [
                { "name": "From", "value": "Ana <ana@example.com>" },
                { "name": "Subject", "value": "Lunch" },
                { "name": "Date", "value": "Mon, 2 Mar 2026 11:00:00 -0800" }
            ]}
        });
        let line = format_message_summary(1, &detail);
        assert!(line.contains("From: Ana <ana@example.com>"));
        assert!(line.contains("Subject: Lunch"));
        assert!(line.contains("lunch on thursday?"));
    }
}
