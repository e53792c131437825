use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct SendEmailArgs {
    pub(crate) to: Vec<String>,
    pub(crate) subject: String,
    pub(crate) body: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateBookingEventArgs {
    pub(crate) summary: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    pub(crate) start_time: String,
    pub(crate) end_time: String,
    #[serde(default)]
    pub(crate) attendees: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReadCalendarEventsArgs {
    pub(crate) start_time: String,
    pub(crate) end_time: String,
    #[serde(default)]
    pub(crate) max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchEmailArgs {
    pub(crate) query: String,
    #[serde(default)]
    pub(crate) max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateDriveDocumentArgs {
    pub(crate) title: String,
    pub(crate) content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WebSearchArgs {
    pub(crate) query: String,
    #[serde(default)]
    pub(crate) max_results: Option<usize>,
    #[serde(default)]
    pub(crate) topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetWeatherArgs {
    pub(crate) location: String,
    #[serde(default)]
    pub(crate) forecast: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchPlaceArgs {
    pub(crate) query: String,
    #[serde(default)]
    pub(crate) language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeocodeAddressArgs {
    pub(crate) address: String,
    #[serde(default)]
    pub(crate) language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReverseGeocodeArgs {
    pub(crate) latitude: f64,
    pub(crate) longitude: f64,
    #[serde(default)]
    pub(crate) language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetDirectionsArgs {
    pub(crate) origin: String,
    pub(crate) destination: String,
    #[serde(default)]
    pub(crate) mode: Option<String>,
    #[serde(default)]
    pub(crate) language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FindNearbyPlacesArgs {
    pub(crate) location: String,
    #[serde(default)]
    pub(crate) place_type: Option<String>,
    #[serde(default)]
    pub(crate) radius: Option<u32>,
    #[serde(default)]
    pub(crate) language: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_event_defaults() {
        let args: CreateBookingEventArgs = serde_json::from_value(serde_json::json!({
            "summary": "Standup",
            "start_time": "2026-03-01T09:30",
            "end_time": "2026-03-01T09:45"
        }))
        .unwrap();
        assert!(args.description.is_none());
        assert!(args.attendees.is_empty());
    }

    #[test]
    fn test_missing_required_field_is_an_error() {
        let result: Result<SendEmailArgs, _> = serde_json::from_value(serde_json::json!({
            "subject": "hi", "body": "there"
        }));
        assert!(result.is_err());
    }
}
