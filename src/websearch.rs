//! Web search via the Tavily API.

use std::time::Duration;

use crate::{ToolFailure, ToolReply};

const SEARCH_URL: &str = "https://api.tavily.com/search";
const DEFAULT_RESULTS: usize = 5;
const MAX_RESULTS: usize = 10;
const TOPICS: [&str; 2] = ["general", "news"];

pub(crate) fn web_search(
    api_key: Option<&str>,
    query: &str,
    max_results: Option<usize>,
    topic: Option<&str>,
) -> Result<ToolReply, ToolFailure> {
    let Some(api_key) = api_key else {
        return Err(ToolFailure::not_configured(
            "web search is unavailable: TAVILY_API_KEY is not set",
        ));
    };
    if query.trim().is_empty() {
        return Err(ToolFailure::invalid_argument("search query must not be empty"));
    }
    let topic = topic.unwrap_or("general");
    if !TOPICS.contains(&topic) {
        return Err(ToolFailure::invalid_argument(format!(
            "topic must be one of {}, got '{topic}'",
            TOPICS.join(", ")
        )));
    }
    let max_results = max_results.unwrap_or(DEFAULT_RESULTS).clamp(1, MAX_RESULTS);

    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10))
        .timeout_read(Duration::from_secs(30))
        .timeout_write(Duration::from_secs(30))
        .build();
    let response = agent
        .post(SEARCH_URL)
        .set("content-type", "application/json")
        .send_json(serde_json::json!({
            "api_key": api_key,
            "query": query,
            "max_results": max_results,
            "topic": topic,
        }));
    let value: serde_json::Value = match response {
        Ok(resp) => resp
            .into_json()
            .map_err(|e| ToolFailure::upstream(format!("web_search: decode failed: {e}")))?,
        Err(ureq::Error::Status(code, resp)) => {
            let text = resp.into_string().unwrap_or_default();
            return Err(crate::classify_http("web_search", code, &text));
        }
        Err(err) => return Err(ToolFailure::upstream(format!("web_search: request failed: {err}"))),
    };

    let results = value
        .get("results")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if results.is_empty() {
        return Err(ToolFailure::not_found(format!("No results found for '{query}'.")));
    }
    Ok(ToolReply::with_details(
        format_results(&results),
        serde_json::json!({ "count": results.len(), "topic": topic }),
    ))
}

pub(crate) fn format_results(results: &[serde_json::Value]) -> String {
    fn field<'a>(result: &'a serde_json::Value, key: &str) -> &'a str {
        result.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }

    results
        .iter()
        .enumerate()
        .map(|(idx, result)| {
            let title = field(result, "title");
            let title = if title.is_empty() { "(no title)" } else { title };
            format!(
                "{}. {title}\n   URL: {}\n   {}",
                idx + 1,
                field(result, "url"),
                field(result, "content")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[test]
    fn test_missing_key_is_not_configured() {
        let err = web_search(None, "rust release notes", None, None).unwrap_err();
        assert_eq!(err.kind, FailureKind::NotConfigured);
    }

    #[test]
    fn test_bad_topic_rejected_before_network() {
        let err = web_search(Some("key"), "anything", None, Some("gossip")).unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidArgument);
    }

    #[test]
    fn test_empty_query_rejected() {
        let err = web_search(Some("key"), "   ", None, None).unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidArgument);
    }

    #[test]
    fn test_format_results() {
        let results = vec![
            serde_json::json!({
                "title": "Rust 1.85", "url": "https://example.com/a", "content": "Release notes."
            }),
            serde_json::json!({ "url": "https://example.com/b", "content": "No title here." }),
        ];
        let text = format_results(&results);
        assert!(text.contains("1. Rust 1.85"));
        assert!(text.contains("2. (no title)"));
        assert!(text.contains("URL: https://example.com/b"));
    }
}
