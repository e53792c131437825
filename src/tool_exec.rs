//! Tool dispatch: resolves a model-requested tool call through the registry
//! into one closed `ToolKind` variant and runs the matching capability
//! provider. All dependencies (credentials, per-capability keys, time zone)
//! are injected by the composition root; nothing here reads the
//! environment or constructs clients lazily.

use chrono::{Datelike, Utc};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;

use crate::{
    google_api, maps, websearch, CredentialManager, Settings, ToolCall, ToolExecution,
    ToolFailure, ToolKind, ToolRegistry, ToolReply, WeatherService,
};

pub(crate) struct Toolbox {
    registry: ToolRegistry,
    credentials: CredentialManager,
    weather: WeatherService,
    timezone: Tz,
    maps_api_key: Option<String>,
    tavily_api_key: Option<String>,
    /// Primary address of the authorized account, used as the mail sender.
    sender: Option<String>,
}

impl Toolbox {
    pub(crate) fn new(
        settings: &Settings,
        registry: ToolRegistry,
        credentials: CredentialManager,
        sender: Option<String>,
    ) -> Self {
        Toolbox {
            registry,
            credentials,
            weather: WeatherService::new(settings.weather_api_key.as_deref()),
            timezone: settings.timezone,
            maps_api_key: settings.maps_api_key.clone(),
            tavily_api_key: settings.tavily_api_key.clone(),
            sender,
        }
    }

    pub(crate) fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute one tool call. Never panics and never raises: every failure
    /// path produces an error-flagged execution so the planner can keep the
    /// call/result pairing intact.
    pub(crate) fn run(&self, call: &ToolCall) -> ToolExecution {
        let Some(kind) = self.registry.resolve(&call.name) else {
            return ToolExecution::from_result(Err(ToolFailure::invalid_argument(format!(
                "unknown tool '{}'",
                call.name
            ))));
        };
        ToolExecution::from_result(self.dispatch(kind, &call.args))
    }

    fn dispatch(&self, kind: ToolKind, args: &serde_json::Value) -> Result<ToolReply, ToolFailure> {
        match kind {
            ToolKind::SendEmail => {
                let args: crate::SendEmailArgs = parse_args(args)?;
                let token = self.credentials.access_token()?;
                google_api::send_email(
                    &token,
                    self.sender.as_deref(),
                    &args.to,
                    &args.subject,
                    &args.body,
                )
            }
            ToolKind::CreateBookingEvent => {
                let args: crate::CreateBookingEventArgs = parse_args(args)?;
                let token = self.credentials.access_token()?;
                google_api::create_booking_event(
                    &token,
                    self.timezone,
                    &args.summary,
                    args.description.as_deref(),
                    &args.start_time,
                    &args.end_time,
                    &args.attendees,
                )
            }
            ToolKind::ReadCalendarEvents => {
                let args: crate::ReadCalendarEventsArgs = parse_args(args)?;
                let token = self.credentials.access_token()?;
                google_api::read_calendar_events(
                    &token,
                    self.timezone,
                    &args.start_time,
                    &args.end_time,
                    args.max_results,
                )
            }
            ToolKind::SearchEmail => {
                let args: crate::SearchEmailArgs = parse_args(args)?;
                let token = self.credentials.access_token()?;
                google_api::search_email(&token, &args.query, args.max_results)
            }
            ToolKind::CreateDriveDocument => {
                let args: crate::CreateDriveDocumentArgs = parse_args(args)?;
                let token = self.credentials.access_token()?;
                google_api::create_drive_document(&token, &args.title, &args.content)
            }
            ToolKind::GetCurrentTime => Ok(self.current_time()),
            ToolKind::WebSearch => {
                let args: crate::WebSearchArgs = parse_args(args)?;
                websearch::web_search(
                    self.tavily_api_key.as_deref(),
                    &args.query,
                    args.max_results,
                    args.topic.as_deref(),
                )
            }
            ToolKind::GetWeather => {
                let args: crate::GetWeatherArgs = parse_args(args)?;
                self.weather
                    .get_weather(&args.location, args.forecast.unwrap_or(false))
            }
            ToolKind::SearchPlace => {
                let args: crate::SearchPlaceArgs = parse_args(args)?;
                maps::search_place(self.maps_key()?, &args.query, args.language.as_deref())
            }
            ToolKind::GeocodeAddress => {
                let args: crate::GeocodeAddressArgs = parse_args(args)?;
                maps::geocode_address(self.maps_key()?, &args.address, args.language.as_deref())
            }
            ToolKind::ReverseGeocode => {
                let args: crate::ReverseGeocodeArgs = parse_args(args)?;
                maps::reverse_geocode(
                    self.maps_key()?,
                    args.latitude,
                    args.longitude,
                    args.language.as_deref(),
                )
            }
            ToolKind::GetDirections => {
                let args: crate::GetDirectionsArgs = parse_args(args)?;
                maps::get_directions(
                    self.maps_key()?,
                    &args.origin,
                    &args.destination,
                    args.mode.as_deref(),
                    args.language.as_deref(),
                )
            }
            ToolKind::FindNearbyPlaces => {
                let args: crate::FindNearbyPlacesArgs = parse_args(args)?;
                maps::find_nearby_places(
                    self.maps_key()?,
                    &args.location,
                    args.place_type.as_deref(),
                    args.radius,
                    args.language.as_deref(),
                )
            }
        }
    }

    fn maps_key(&self) -> Result<&str, ToolFailure> {
        // Maps tools are only registered with a key present; this guards the
        // invariant anyway so a miswired registry cannot cause a panic.
        self.maps_api_key.as_deref().ok_or_else(|| {
            ToolFailure::not_configured("maps tools are unavailable: GOOGLE_MAPS_API_KEY is not set")
        })
    }

    fn current_time(&self) -> ToolReply {
        let now = Utc::now().with_timezone(&self.timezone);
        ToolReply::with_details(
            format!(
                "Current time: {}\nDay: {}\nWeek: {}\nTimezone: {}",
                now.format("%Y-%m-%d %H:%M:%S"),
                now.format("%A"),
                now.iso_week().week(),
                self.timezone.name(),
            ),
            serde_json::json!({ "iso": now.to_rfc3339() }),
        )
    }
}

fn parse_args<T: DeserializeOwned>(args: &serde_json::Value) -> Result<T, ToolFailure> {
    serde_json::from_value(args.clone())
        .map_err(|e| ToolFailure::invalid_argument(format!("bad tool arguments: {e}")))
}
