use std::collections::HashMap;

use crate::Settings;

/// Closed set of capabilities. The model selects by name at runtime; names
/// resolve through the registry's lookup table into exactly one of these
/// variants, built once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ToolKind {
    SendEmail,
    CreateBookingEvent,
    ReadCalendarEvents,
    SearchEmail,
    CreateDriveDocument,
    GetCurrentTime,
    WebSearch,
    GetWeather,
    // Optional maps group — registered only when the maps key is configured.
    SearchPlace,
    GeocodeAddress,
    ReverseGeocode,
    GetDirections,
    FindNearbyPlaces,
}

pub(crate) struct ToolSpec {
    pub(crate) name: &'static str,
    pub(crate) kind: ToolKind,
    pub(crate) description: &'static str,
    pub(crate) parameters: serde_json::Value,
}

pub(crate) struct ToolRegistry {
    specs: Vec<ToolSpec>,
    by_name: HashMap<&'static str, ToolKind>,
}

impl ToolRegistry {
    /// Deterministic given configuration: the mandatory set is always
    /// present; the maps group is appended only when its key is configured.
    /// Unconfigured optional tools are omitted entirely — never exposed in
    /// a disabled state. The snapshot is fixed for the session's lifetime.
    pub(crate) fn build(settings: &Settings) -> Self {
        let mut specs = mandatory_specs();
        if settings.maps_api_key.is_some() {
            let maps = maps_specs();
            eprintln!("[registry] {} maps tools enabled", maps.len());
            specs.extend(maps);
        }
        let by_name = specs.iter().map(|s| (s.name, s.kind)).collect();
        ToolRegistry { specs, by_name }
    }

    pub(crate) fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<ToolKind> {
        self.by_name.get(name).copied()
    }
}

fn mandatory_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "send_email",
            kind: ToolKind::SendEmail,
            description: "Send a plain-text email from the authorized account. Recipients, subject, and body must all be provided.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "to": { "type": "array", "items": { "type": "string" }, "description": "Recipient email addresses" },
                    "subject": { "type": "string" },
                    "body": { "type": "string", "description": "Full plain-text body of the email" }
                },
                "required": ["to", "subject", "body"]
            }),
        },
        ToolSpec {
            name: "create_booking_event",
            kind: ToolKind::CreateBookingEvent,
            description: "Create a calendar event on the primary calendar. Times are naive local timestamps (YYYY-MM-DDTHH:MM) in the configured time zone.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string", "description": "Event title" },
                    "description": { "type": "string", "description": "Event details" },
                    "start_time": { "type": "string", "description": "Start, e.g. 2026-03-01T09:30" },
                    "end_time": { "type": "string", "description": "End, e.g. 2026-03-01T10:00" },
                    "attendees": { "type": "array", "items": { "type": "string" }, "description": "Attendee email addresses" }
                },
                "required": ["summary", "start_time", "end_time"]
            }),
        },
        ToolSpec {
            name: "read_calendar_events",
            kind: ToolKind::ReadCalendarEvents,
            description: "List calendar events between two naive local timestamps. Use get_current_time first to anchor relative ranges like 'today'.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "start_time": { "type": "string", "description": "Range start, e.g. 2026-03-01T00:00" },
                    "end_time": { "type": "string", "description": "Range end, e.g. 2026-03-01T23:59" },
                    "max_results": { "type": "integer" }
                },
                "required": ["start_time", "end_time"]
            }),
        },
        ToolSpec {
            name: "search_email",
            kind: ToolKind::SearchEmail,
            description: "Search the mailbox with a provider query string (e.g. 'from:ana@example.com subject:invoice is:unread').",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "max_results": { "type": "integer", "description": "Cap on messages returned (default 10)" }
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: "create_drive_document",
            kind: ToolKind::CreateDriveDocument,
            description: "Create a document in the user's drive with the given title and full text content; returns the document link.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "content": { "type": "string", "description": "Full plain-text body of the document" }
                },
                "required": ["title", "content"]
            }),
        },
        ToolSpec {
            name: "get_current_time",
            kind: ToolKind::GetCurrentTime,
            description: "Current date and time in the configured time zone, with day of week and ISO week number.",
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: "web_search",
            kind: ToolKind::WebSearch,
            description: "Search the web for current information, news, or facts. Returns titles, URLs, and snippets.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "max_results": { "type": "integer", "description": "1-10, default 5" },
                    "topic": { "type": "string", "enum": ["general", "news"] }
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: "get_weather",
            kind: ToolKind::GetWeather,
            description: "Current weather or a 3-day forecast for a city.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string", "description": "City name, e.g. 'shanghai' or 'london'" },
                    "forecast": { "type": "boolean", "description": "true for the 3-day forecast instead of current conditions" }
                },
                "required": ["location"]
            }),
        },
    ]
}

fn maps_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "search_place",
            kind: ToolKind::SearchPlace,
            description: "Search for places by free text (restaurants, hotels, attractions). Returns name, address, rating, coordinates.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "language": { "type": "string", "description": "Result language code, default en" }
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: "geocode_address",
            kind: ToolKind::GeocodeAddress,
            description: "Convert an address to geographic coordinates.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "address": { "type": "string" },
                    "language": { "type": "string" }
                },
                "required": ["address"]
            }),
        },
        ToolSpec {
            name: "reverse_geocode",
            kind: ToolKind::ReverseGeocode,
            description: "Convert coordinates to a human-readable address.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "latitude": { "type": "number" },
                    "longitude": { "type": "number" },
                    "language": { "type": "string" }
                },
                "required": ["latitude", "longitude"]
            }),
        },
        ToolSpec {
            name: "get_directions",
            kind: ToolKind::GetDirections,
            description: "Directions between two locations with distance, duration, and step-by-step instructions. Modes: driving, walking, bicycling, transit.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "origin": { "type": "string" },
                    "destination": { "type": "string" },
                    "mode": { "type": "string", "enum": ["driving", "walking", "bicycling", "transit"] },
                    "language": { "type": "string" }
                },
                "required": ["origin", "destination"]
            }),
        },
        ToolSpec {
            name: "find_nearby_places",
            kind: ToolKind::FindNearbyPlaces,
            description: "Find places of a given type near a location (restaurant, cafe, hotel, gas_station, hospital, ...).",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string", "description": "Center address or place name" },
                    "place_type": { "type": "string", "description": "Place type, default restaurant" },
                    "radius": { "type": "integer", "description": "Search radius in meters, max 50000" },
                    "language": { "type": "string" }
                },
                "required": ["location"]
            }),
        },
    ]
}
