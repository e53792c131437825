//! Places, geocoding, and directions capabilities backed by the Google Maps
//! web APIs. These tools are only registered when a maps key is configured.

use std::time::Duration;

use crate::{ToolFailure, ToolReply};

const PLACES_TEXT_URL: &str = "https://maps.googleapis.com/maps/api/place/textsearch/json";
const PLACES_NEARBY_URL: &str = "https://maps.googleapis.com/maps/api/place/nearbysearch/json";
const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_NEARBY_RADIUS_M: u32 = 1_000;
pub(crate) const MAX_NEARBY_RADIUS_M: u32 = 50_000;
const MAX_LISTED_PLACES: usize = 10;

const TRAVEL_MODES: [&str; 4] = ["driving", "walking", "bicycling", "transit"];

fn http_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(15))
        .timeout_read(Duration::from_secs(30))
        .timeout_write(Duration::from_secs(30))
        .build()
}

/// All maps endpoints share the same response envelope: a `status` field
/// plus result payload. Non-OK statuses map onto the failure taxonomy.
fn check_status(op: &str, value: &serde_json::Value) -> Result<(), ToolFailure> {
    let status = value.get("status").and_then(|v| v.as_str()).unwrap_or("UNKNOWN");
    let detail = value
        .get("error_message")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    match status {
        "OK" => Ok(()),
        "ZERO_RESULTS" | "NOT_FOUND" => {
            Err(ToolFailure::not_found(format!("{op}: no results. {detail}")))
        }
        "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => {
            Err(ToolFailure::rate_limited(format!("{op}: query limit exceeded. {detail}")))
        }
        "INVALID_REQUEST" => {
            Err(ToolFailure::invalid_argument(format!("{op}: invalid request. {detail}")))
        }
        "REQUEST_DENIED" => Err(ToolFailure::not_configured(format!(
            "{op}: request denied — check the maps API key. {detail}"
        ))),
        other => Err(ToolFailure::upstream(format!("{op}: status {other}. {detail}"))),
    }
}

fn call_maps(op: &str, url: &str, params: &[(&str, &str)]) -> Result<serde_json::Value, ToolFailure> {
    let mut request = http_agent().get(url);
    for (key, value) in params {
        request = request.query(key, value);
    }
    let value: serde_json::Value = match request.call() {
        Ok(resp) => resp
            .into_json()
            .map_err(|e| ToolFailure::upstream(format!("{op}: response decode failed: {e}")))?,
        Err(ureq::Error::Status(code, resp)) => {
            let text = resp.into_string().unwrap_or_default();
            return Err(crate::classify_http(op, code, &text));
        }
        Err(err) => return Err(ToolFailure::upstream(format!("{op}: request failed: {err}"))),
    };
    check_status(op, &value)?;
    Ok(value)
}

/// Strip markup from instruction text so the result is suitable for direct
/// display. Divider divs become " - " (matching how the upstream embeds
/// secondary clauses); every other tag is dropped.
pub(crate) fn strip_html(input: &str) -> String {
    let with_dividers = input.replace("<div", " - <div");
    let mut out = String::with_capacity(with_dividers.len());
    let mut in_tag = false;
    for c in with_dividers.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn format_place_line(rank: usize, place: &serde_json::Value, address_key: &str) -> String {
    let name = place.get("name").and_then(|v| v.as_str()).unwrap_or("(unnamed)");
    let address = place
        .get(address_key)
        .and_then(|v| v.as_str())
        .unwrap_or("(address unknown)");
    let mut line = format!("{rank}. {name}\n   Address: {address}");
    if let Some(rating) = place.get("rating").and_then(|v| v.as_f64()) {
        let reviews = place
            .get("user_ratings_total")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        line.push_str(&format!("\n   Rating: {rating} ({reviews} reviews)"));
    }
    if let Some(location) = place
        .get("geometry")
        .and_then(|g| g.get("location"))
    {
        if let (Some(lat), Some(lng)) = (
            location.get("lat").and_then(|v| v.as_f64()),
            location.get("lng").and_then(|v| v.as_f64()),
        ) {
            line.push_str(&format!("\n   Coordinates: {lat}, {lng}"));
        }
    }
    if let Some(open) = place
        .get("opening_hours")
        .and_then(|h| h.get("open_now"))
        .and_then(|v| v.as_bool())
    {
        line.push_str(if open { "\n   Status: open now" } else { "\n   Status: closed" });
    }
    line
}

pub(crate) fn search_place(
    api_key: &str,
    query: &str,
    language: Option<&str>,
) -> Result<ToolReply, ToolFailure> {
    if query.trim().is_empty() {
        return Err(ToolFailure::invalid_argument("place query must not be empty"));
    }
    let language = language.unwrap_or(DEFAULT_LANGUAGE);
    let value = call_maps(
        "search_place",
        PLACES_TEXT_URL,
        &[("query", query), ("language", language), ("key", api_key)],
    )?;
    let results = value
        .get("results")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if results.is_empty() {
        return Err(ToolFailure::not_found(format!("No places found for '{query}'.")));
    }

    let mut lines = vec![format!("Found {} place(s) for '{query}':", results.len())];
    for (idx, place) in results.iter().take(MAX_LISTED_PLACES).enumerate() {
        lines.push(format_place_line(idx + 1, place, "formatted_address"));
    }
    Ok(ToolReply::with_details(
        lines.join("\n"),
        serde_json::json!({ "count": results.len() }),
    ))
}

pub(crate) fn geocode_address(
    api_key: &str,
    address: &str,
    language: Option<&str>,
) -> Result<ToolReply, ToolFailure> {
    if address.trim().is_empty() {
        return Err(ToolFailure::invalid_argument("address must not be empty"));
    }
    let language = language.unwrap_or(DEFAULT_LANGUAGE);
    let value = call_maps(
        "geocode_address",
        GEOCODE_URL,
        &[("address", address), ("language", language), ("key", api_key)],
    )?;
    let Some(result) = value.get("results").and_then(|v| v.as_array()).and_then(|r| r.first())
    else {
        return Err(ToolFailure::not_found(format!("Unable to geocode address: {address}")));
    };
    let formatted = result
        .get("formatted_address")
        .and_then(|v| v.as_str())
        .unwrap_or(address);
    let location = result
        .get("geometry")
        .and_then(|g| g.get("location"))
        .cloned()
        .unwrap_or_default();
    let lat = location.get("lat").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let lng = location.get("lng").and_then(|v| v.as_f64()).unwrap_or(0.0);
    Ok(ToolReply::with_details(
        format!("Address: {formatted}\nCoordinates: {lat}, {lng}"),
        serde_json::json!({ "lat": lat, "lng": lng }),
    ))
}

pub(crate) fn reverse_geocode(
    api_key: &str,
    latitude: f64,
    longitude: f64,
    language: Option<&str>,
) -> Result<ToolReply, ToolFailure> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(ToolFailure::invalid_argument(format!(
            "coordinates ({latitude}, {longitude}) are out of range"
        )));
    }
    let language = language.unwrap_or(DEFAULT_LANGUAGE);
    let latlng = format!("{latitude},{longitude}");
    let value = call_maps(
        "reverse_geocode",
        GEOCODE_URL,
        &[("latlng", &latlng), ("language", language), ("key", api_key)],
    )?;
    let Some(result) = value.get("results").and_then(|v| v.as_array()).and_then(|r| r.first())
    else {
        return Err(ToolFailure::not_found(format!(
            "No address found for coordinates ({latitude}, {longitude})"
        )));
    };
    let formatted = result
        .get("formatted_address")
        .and_then(|v| v.as_str())
        .unwrap_or("(unknown)");
    Ok(ToolReply::plain(format!("Address: {formatted}")))
}

/// One step of a route, flattened to display text. Transit steps carry the
/// line, boarding/alighting stops, and scheduled times; other modes carry
/// the stripped instruction plus distance and duration.
pub(crate) fn format_step(rank: usize, step: &serde_json::Value) -> String {
    let mode = step.get("travel_mode").and_then(|v| v.as_str()).unwrap_or("");
    let distance = step
        .get("distance")
        .and_then(|d| d.get("text"))
        .and_then(|v| v.as_str())
        .unwrap_or("?");
    let duration = step
        .get("duration")
        .and_then(|d| d.get("text"))
        .and_then(|v| v.as_str())
        .unwrap_or("?");

    fn stop_name<'a>(transit: &'a serde_json::Value, key: &str) -> &'a str {
        transit
            .get(key)
            .and_then(|s| s.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("(stop)")
    }
    fn stop_time<'a>(transit: &'a serde_json::Value, key: &str) -> &'a str {
        transit
            .get(key)
            .and_then(|t| t.get("text"))
            .and_then(|v| v.as_str())
            .unwrap_or("?")
    }

    if mode == "TRANSIT" {
        if let Some(transit) = step.get("transit_details") {
            let line = transit
                .get("line")
                .and_then(|l| l.get("short_name").or_else(|| l.get("name")))
                .and_then(|v| v.as_str())
                .unwrap_or("(line)");
            let stops = transit.get("num_stops").and_then(|v| v.as_u64()).unwrap_or(0);
            return format!(
                "{rank}. Take {line} from {} (departs {}) to {} (arrives {}), {stops} stops",
                stop_name(transit, "departure_stop"),
                stop_time(transit, "departure_time"),
                stop_name(transit, "arrival_stop"),
                stop_time(transit, "arrival_time"),
            );
        }
    }

    let instruction = step
        .get("html_instructions")
        .and_then(|v| v.as_str())
        .map(strip_html)
        .unwrap_or_else(|| "(continue)".to_string());
    format!("{rank}. {instruction}\n   Distance: {distance}, Duration: {duration}")
}

pub(crate) fn format_route(origin: &str, destination: &str, mode: &str, route: &serde_json::Value) -> String {
    fn leg_field<'a>(leg: &'a serde_json::Value, key: &str) -> &'a str {
        leg.get(key).and_then(|v| v.as_str()).unwrap_or("(unknown)")
    }
    fn leg_metric<'a>(leg: &'a serde_json::Value, key: &str) -> &'a str {
        leg.get(key)
            .and_then(|d| d.get("text"))
            .and_then(|v| v.as_str())
            .unwrap_or("?")
    }

    let Some(leg) = route.get("legs").and_then(|v| v.as_array()).and_then(|l| l.first()) else {
        return format!("No route details available from {origin} to {destination}.");
    };
    let mut lines = vec![
        format!("From {}", leg_field(leg, "start_address")),
        format!("To {}", leg_field(leg, "end_address")),
        String::new(),
        format!("Distance: {}", leg_metric(leg, "distance")),
        format!("Duration: {}", leg_metric(leg, "duration")),
        format!("Travel mode: {mode}"),
        String::new(),
        "Directions:".to_string(),
    ];
    if let Some(steps) = leg.get("steps").and_then(|v| v.as_array()) {
        for (idx, step) in steps.iter().enumerate() {
            lines.push(format_step(idx + 1, step));
        }
    }
    lines.join("\n")
}

pub(crate) fn get_directions(
    api_key: &str,
    origin: &str,
    destination: &str,
    mode: Option<&str>,
    language: Option<&str>,
) -> Result<ToolReply, ToolFailure> {
    if origin.trim().is_empty() || destination.trim().is_empty() {
        return Err(ToolFailure::invalid_argument("origin and destination are both required"));
    }
    let mode = mode.unwrap_or("driving").to_ascii_lowercase();
    if !TRAVEL_MODES.contains(&mode.as_str()) {
        return Err(ToolFailure::invalid_argument(format!(
            "mode must be one of {}, got '{mode}'",
            TRAVEL_MODES.join(", ")
        )));
    }
    let language = language.unwrap_or(DEFAULT_LANGUAGE);
    let value = call_maps(
        "get_directions",
        DIRECTIONS_URL,
        &[
            ("origin", origin),
            ("destination", destination),
            ("mode", &mode),
            ("language", language),
            ("departure_time", "now"),
            ("key", api_key),
        ],
    )?;
    let Some(route) = value.get("routes").and_then(|v| v.as_array()).and_then(|r| r.first())
    else {
        return Err(ToolFailure::not_found(format!(
            "Unable to find a route from {origin} to {destination}"
        )));
    };
    Ok(ToolReply::plain(format_route(origin, destination, &mode, route)))
}

pub(crate) fn find_nearby_places(
    api_key: &str,
    location: &str,
    place_type: Option<&str>,
    radius: Option<u32>,
    language: Option<&str>,
) -> Result<ToolReply, ToolFailure> {
    if location.trim().is_empty() {
        return Err(ToolFailure::invalid_argument("location must not be empty"));
    }
    let place_type = place_type.unwrap_or("restaurant");
    let radius = radius.unwrap_or(DEFAULT_NEARBY_RADIUS_M).clamp(1, MAX_NEARBY_RADIUS_M);
    let language = language.unwrap_or(DEFAULT_LANGUAGE);

    // Resolve the center first; nearby search needs coordinates.
    let geocoded = call_maps(
        "find_nearby_places",
        GEOCODE_URL,
        &[("address", location), ("language", language), ("key", api_key)],
    )?;
    let Some(center) = geocoded
        .get("results")
        .and_then(|v| v.as_array())
        .and_then(|r| r.first())
        .and_then(|r| r.get("geometry"))
        .and_then(|g| g.get("location"))
    else {
        return Err(ToolFailure::not_found(format!("Unable to recognize location: {location}")));
    };
    let lat = center.get("lat").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let lng = center.get("lng").and_then(|v| v.as_f64()).unwrap_or(0.0);

    let latlng = format!("{lat},{lng}");
    let radius_str = radius.to_string();
    let value = call_maps(
        "find_nearby_places",
        PLACES_NEARBY_URL,
        &[
            ("location", latlng.as_str()),
            ("radius", radius_str.as_str()),
            ("type", place_type),
            ("language", language),
            ("key", api_key),
        ],
    )?;
    let results = value
        .get("results")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if results.is_empty() {
        return Err(ToolFailure::not_found(format!(
            "No {place_type} found within {radius} meters of {location}"
        )));
    }

    let mut lines = vec![format!(
        "Found {} {place_type}(s) within {radius}m of {location}:",
        results.len()
    )];
    for (idx, place) in results.iter().take(MAX_LISTED_PLACES).enumerate() {
        lines.push(format_place_line(idx + 1, place, "vicinity"));
    }
    Ok(ToolReply::with_details(
        lines.join("\n"),
        serde_json::json!({ "count": results.len(), "radius_m": radius }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("Turn <b>left</b> onto Main St"), "Turn left onto Main St");
        assert_eq!(
            strip_html("Head north<div style=\"font-size:0.9em\">Toll road</div>"),
            "Head north - Toll road"
        );
        assert_eq!(strip_html("no markup"), "no markup");
    }

    #[test]
    fn test_status_mapping() {
        let case = |status: &str| {
            check_status("op", &serde_json::json!({ "status": status })).unwrap_err().kind
        };
        assert_eq!(case("ZERO_RESULTS"), FailureKind::NotFound);
        assert_eq!(case("OVER_QUERY_LIMIT"), FailureKind::RateLimited);
        assert_eq!(case("INVALID_REQUEST"), FailureKind::InvalidArgument);
        assert_eq!(case("REQUEST_DENIED"), FailureKind::NotConfigured);
        assert_eq!(case("WEIRD"), FailureKind::UpstreamError);
        assert!(check_status("op", &serde_json::json!({ "status": "OK" })).is_ok());
    }

    #[test]
    fn test_transit_step_reports_line_and_stops() {
        let step = serde_json::json!({
            "travel_mode": "TRANSIT",
            "distance": { "text": "8.2 km" },
            "duration": { "text": "14 mins" },
            "transit_details": {
                "line": { "short_name": "U2" },
                "departure_stop": { "name": "Alexanderplatz" },
                "arrival_stop": { "name": "Zoologischer Garten" },
                "departure_time": { "text": "10:05" },
                "arrival_time": { "text": "10:19" },
                "num_stops": 7
            }
        });
        let text = format_step(3, &step);
        assert_eq!(
            text,
            "3. Take U2 from Alexanderplatz (departs 10:05) to Zoologischer Garten (arrives 10:19), 7 stops"
        );
    }

    #[test]
    fn test_walking_step_strips_markup() {
        let step = serde_json::json!({
            "travel_mode": "WALKING",
            "html_instructions": "Walk to <b>Alexanderplatz</b>",
            "distance": { "text": "400 m" },
            "duration": { "text": "5 mins" }
        });
        let text = format_step(1, &step);
        assert!(text.starts_with("1. Walk to Alexanderplatz"));
        assert!(text.contains("Distance: 400 m, Duration: 5 mins"));
    }

    #[test]
    fn test_format_route_mixed_modes() {
        let route = serde_json::json!({
            "legs": [{
                "start_address": "A",
                "end_address": "B",
                "distance": { "text": "9 km" },
                "duration": { "text": "25 mins" },
                "steps": [
                    {
                        "travel_mode": "WALKING",
                        "html_instructions": "Walk to the station",
                        "distance": { "text": "300 m" },
                        "duration": { "text": "4 mins" }
                    },
                    {
                        "travel_mode": "TRANSIT",
                        "transit_details": {
                            "line": { "name": "Airport Express" },
                            "departure_stop": { "name": "Central" },
                            "arrival_stop": { "name": "Airport" },
                            "departure_time": { "text": "10:10" },
                            "arrival_time": { "text": "10:31" },
                            "num_stops": 2
                        }
                    }
                ]
            }]
        });
        let text = format_route("A", "B", "transit", &route);
        assert!(text.contains("Distance: 9 km"));
        assert!(text.contains("1. Walk to the station"));
        assert!(text.contains("2. Take Airport Express from Central (departs 10:10)"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_directions_rejects_unknown_mode() {
        let err = get_directions("key", "A", "B", Some("teleport"), None).unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidArgument);
    }

    #[test]
    fn test_reverse_geocode_rejects_out_of_range() {
        let err = reverse_geocode("key", 123.0, 0.0, None).unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidArgument);
    }
}
