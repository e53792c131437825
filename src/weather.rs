//! Current weather and short forecasts via the QWeather API.
//!
//! The key setting accepts two shapes: `HOST,KEY` for a dedicated API host,
//! or a bare `KEY` for the free developer endpoint. A missing key is
//! detected before any network call and reported `not_configured` — the
//! answer is the same on every call.

use std::time::Duration;

use crate::{ToolFailure, ToolReply};

const FREE_API_HOST: &str = "devapi.qweather.com";

/// Location ids for common cities, consulted before the remote lookup
/// endpoint (which is not available on all plans).
const CITY_IDS: &[(&str, &str)] = &[
    ("beijing", "101010100"),
    ("shanghai", "101020100"),
    ("guangzhou", "101280101"),
    ("shenzhen", "101280601"),
    ("chengdu", "101270101"),
    ("hangzhou", "101210101"),
    ("wuhan", "101200101"),
    ("xian", "101110101"),
    ("nanjing", "101190101"),
    ("tianjin", "101030100"),
    ("chongqing", "101040100"),
    ("suzhou", "101190401"),
    ("qingdao", "101120201"),
    ("xiamen", "101230201"),
    ("hong kong", "101320101"),
    ("hongkong", "101320101"),
    ("macau", "101330101"),
    ("taipei", "101340101"),
    ("new york", "newyork"),
    ("newyork", "newyork"),
    ("london", "london"),
    ("tokyo", "tokyo"),
    ("paris", "paris"),
    ("sydney", "sydney"),
    ("singapore", "singapore"),
    ("seoul", "seoul"),
    ("bangkok", "bangkok"),
    ("berlin", "berlin"),
    ("moscow", "moscow"),
    ("toronto", "toronto"),
    ("los angeles", "losangeles"),
    ("san francisco", "sanfrancisco"),
    ("chicago", "chicago"),
];

pub(crate) struct WeatherService {
    base_url: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl WeatherService {
    /// `key_setting` is the raw WEATHER_API_KEY value, if any.
    pub(crate) fn new(key_setting: Option<&str>) -> Self {
        let (base_url, api_key) = match key_setting {
            None => (format!("https://{FREE_API_HOST}/v7"), None),
            Some(raw) if raw.contains("qweatherapi.com") => {
                match raw.split_once(',') {
                    Some((host, key)) => (
                        format!("https://{}/v7", host.trim()),
                        Some(key.trim().to_string()),
                    ),
                    None => {
                        // Host without a key cannot authenticate; treated as
                        // unconfigured, but keep the host for the message.
                        eprintln!(
                            "[weather] WEATHER_API_KEY has a host but no key (expected HOST,KEY)"
                        );
                        (format!("https://{}/v7", raw.trim()), None)
                    }
                }
            }
            Some(key) => (
                format!("https://{FREE_API_HOST}/v7"),
                Some(key.trim().to_string()),
            ),
        };
        WeatherService {
            base_url,
            api_key,
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(10))
                .timeout_read(Duration::from_secs(10))
                .timeout_write(Duration::from_secs(10))
                .build(),
        }
    }

    pub(crate) fn get_weather(
        &self,
        location: &str,
        forecast: bool,
    ) -> Result<ToolReply, ToolFailure> {
        if location.trim().is_empty() {
            return Err(ToolFailure::invalid_argument("location must not be empty"));
        }
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ToolFailure::not_configured(
                "weather lookups are unavailable: WEATHER_API_KEY is not set",
            ));
        };

        let location_id = self.resolve_city(location, api_key)?;
        let path = if forecast { "weather/3d" } else { "weather/now" };
        let value = self.call(api_key, path, &location_id)?;
        check_vendor_code("get_weather", &value)?;

        let text = if forecast {
            format_forecast(location, &value)
        } else {
            format_current(location, &value)
        };
        Ok(ToolReply::with_details(
            text,
            serde_json::json!({ "location_id": location_id, "forecast": forecast }),
        ))
    }

    fn call(
        &self,
        api_key: &str,
        path: &str,
        location_id: &str,
    ) -> Result<serde_json::Value, ToolFailure> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .agent
            .get(&url)
            .query("location", location_id)
            .set("X-QW-Api-Key", api_key)
            .call();
        match response {
            Ok(resp) => resp
                .into_json()
                .map_err(|e| ToolFailure::upstream(format!("get_weather: decode failed: {e}"))),
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                Err(crate::classify_http("get_weather", code, &text))
            }
            Err(err) => Err(ToolFailure::upstream(format!("get_weather: request failed: {err}"))),
        }
    }

    fn resolve_city(&self, location: &str, api_key: &str) -> Result<String, ToolFailure> {
        if let Some(id) = lookup_city_id(location) {
            return Ok(id.to_string());
        }
        // Fall back to the remote lookup endpoint.
        let value = self.call(api_key, "city/lookup", location)?;
        if value.get("code").and_then(|v| v.as_str()) == Some("200") {
            if let Some(id) = value
                .get("location")
                .and_then(|v| v.as_array())
                .and_then(|l| l.first())
                .and_then(|c| c.get("id"))
                .and_then(|v| v.as_str())
            {
                return Ok(id.to_string());
            }
        }
        Err(ToolFailure::not_found(format!(
            "Unknown city '{location}' — try a larger nearby city"
        )))
    }
}

pub(crate) fn lookup_city_id(location: &str) -> Option<&'static str> {
    let key = location.trim().to_lowercase();
    CITY_IDS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, id)| *id)
}

/// The vendor wraps errors in a 200 response with its own `code` field.
fn check_vendor_code(op: &str, value: &serde_json::Value) -> Result<(), ToolFailure> {
    let code = value.get("code").and_then(|v| v.as_str()).unwrap_or("");
    match code {
        "200" => Ok(()),
        "400" => Err(ToolFailure::invalid_argument(format!("{op}: bad request parameters"))),
        "402" | "429" => Err(ToolFailure::rate_limited(format!(
            "{op}: request quota exhausted (code {code})"
        ))),
        "404" => Err(ToolFailure::not_found(format!("{op}: no data for this location"))),
        "401" | "403" => Err(ToolFailure::upstream(format!(
            "{op}: weather API rejected the key (code {code})"
        ))),
        other => Err(ToolFailure::upstream(format!("{op}: weather API error code {other}"))),
    }
}

pub(crate) fn format_current(city: &str, value: &serde_json::Value) -> String {
    let now = value.get("now").cloned().unwrap_or_default();
    let field = |key: &str| -> String {
        now.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("N/A")
            .to_string()
    };
    let updated = value
        .get("updateTime")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    format!(
        "Current weather in {city}\n\nTemperature: {}C (feels like {}C)\nCondition: {}\nHumidity: {}%\nWind: {} level {}\nPressure: {} hPa\n\nLast update: {updated}",
        field("temp"),
        field("feelsLike"),
        field("text"),
        field("humidity"),
        field("windDir"),
        field("windScale"),
        field("pressure"),
    )
}

pub(crate) fn format_forecast(city: &str, value: &serde_json::Value) -> String {
    let daily = value
        .get("daily")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if daily.is_empty() {
        return format!("No forecast data available for {city}.");
    }
    fn day_field<'a>(day: &'a serde_json::Value, key: &str) -> &'a str {
        day.get(key).and_then(|v| v.as_str()).unwrap_or("N/A")
    }

    let mut out = format!("Weather forecast for {city} (next {} days)\n", daily.len());
    for day in &daily {
        out.push_str(&format!(
            "\nDate: {}\nTemperature: {}C to {}C\nDay: {} | Night: {}\nHumidity: {}%\n",
            day_field(day, "fxDate"),
            day_field(day, "tempMin"),
            day_field(day, "tempMax"),
            day_field(day, "textDay"),
            day_field(day, "textNight"),
            day_field(day, "humidity"),
        ));
    }
    out.trim_end().to_string()
}
