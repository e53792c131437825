use std::io;
use std::path::PathBuf;

use chrono_tz::Tz;

use crate::{env_f64, env_optional, env_required, env_usize};

pub(crate) const DEFAULT_TOKEN_PATH: &str = "token.json";
pub(crate) const DEFAULT_IDENTITY_PATH: &str = "identity.json";

/// Application settings, loaded once from the environment by the composition
/// root and passed down explicitly. Every component receives the values it
/// needs as constructor arguments; nothing reads the environment lazily at
/// call time.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    // Model endpoint (OpenAI-compatible chat completions).
    pub(crate) model_api_key: String,
    pub(crate) model_api_base: String,
    pub(crate) model_name: String,
    pub(crate) model_temperature: f64,
    pub(crate) model_max_retries: usize,

    // Google OAuth.
    pub(crate) google_client_id: Option<String>,
    pub(crate) google_client_secret: Option<String>,
    pub(crate) token_path: PathBuf,
    pub(crate) identity_path: PathBuf,

    /// Time zone applied to naive timestamps before they reach any
    /// time-based provider.
    pub(crate) timezone: Tz,

    // Optional capability keys. Absent key => the capability reports
    // `not_configured` (weather, web search) or is omitted from the
    // registry entirely (maps).
    pub(crate) maps_api_key: Option<String>,
    pub(crate) weather_api_key: Option<String>,
    pub(crate) tavily_api_key: Option<String>,

    // Model-call rate limiting (token bucket).
    pub(crate) rate_limit_requests_per_second: f64,
    pub(crate) rate_limit_max_burst: f64,
    pub(crate) rate_limit_check_interval_secs: f64,

    // Conversation memory bounds.
    pub(crate) max_context_tokens: usize,
    pub(crate) keep_recent_messages: usize,
    pub(crate) keep_tool_results: usize,

    pub(crate) max_planner_rounds: usize,
}

impl Settings {
    pub(crate) fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let timezone_name = env_optional("GOOGLE_CALENDAR_TIMEZONE")
            .unwrap_or_else(|| "America/Los_Angeles".to_string());
        let timezone: Tz = timezone_name.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid GOOGLE_CALENDAR_TIMEZONE: {timezone_name}"),
            )
        })?;

        let rate = env_f64("RATE_LIMIT_REQUESTS_PER_SECOND", 0.2)?;
        if rate <= 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "RATE_LIMIT_REQUESTS_PER_SECOND must be positive",
            )
            .into());
        }

        Ok(Settings {
            model_api_key: env_required("DEEPSEEK_API_KEY")?,
            model_api_base: env_optional("DEEPSEEK_API_BASE")
                .unwrap_or_else(|| "https://api.deepseek.com".to_string()),
            model_name: env_optional("DEEPSEEK_MODEL")
                .unwrap_or_else(|| "deepseek-chat".to_string()),
            model_temperature: env_f64("DEEPSEEK_TEMPERATURE", 0.7)?,
            model_max_retries: env_usize("DEEPSEEK_MAX_RETRIES", 2)?,
            google_client_id: env_optional("GOOGLE_CLIENT_ID"),
            google_client_secret: env_optional("GOOGLE_CLIENT_SECRET"),
            token_path: env_optional("GOOGLE_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH)),
            identity_path: env_optional("GOOGLE_IDENTITY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IDENTITY_PATH)),
            timezone,
            maps_api_key: env_optional("GOOGLE_MAPS_API_KEY"),
            weather_api_key: env_optional("WEATHER_API_KEY"),
            tavily_api_key: env_optional("TAVILY_API_KEY"),
            rate_limit_requests_per_second: rate,
            rate_limit_max_burst: env_f64("RATE_LIMIT_MAX_BURST", 10.0)?.max(1.0),
            rate_limit_check_interval_secs: env_f64("RATE_LIMIT_CHECK_INTERVAL", 0.1)?
                .max(0.01),
            max_context_tokens: env_usize("MAX_CONTEXT_TOKENS", 48_000)?,
            keep_recent_messages: env_usize("KEEP_RECENT_MESSAGES", 10)?,
            keep_tool_results: env_usize("KEEP_TOOL_RESULTS", 5)?,
            max_planner_rounds: env_usize("MAX_PLANNER_ROUNDS", 12)?.max(1),
        })
    }

    /// Settings for tests: no live keys, deterministic bounds.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Settings {
            model_api_key: "test-key".to_string(),
            model_api_base: "http://127.0.0.1:1".to_string(),
            model_name: "test-model".to_string(),
            model_temperature: 0.0,
            model_max_retries: 0,
            google_client_id: None,
            google_client_secret: None,
            token_path: PathBuf::from("token.json"),
            identity_path: PathBuf::from("identity.json"),
            timezone: chrono_tz::UTC,
            maps_api_key: None,
            weather_api_key: None,
            tavily_api_key: None,
            rate_limit_requests_per_second: 100.0,
            rate_limit_max_burst: 100.0,
            rate_limit_check_interval_secs: 0.01,
            max_context_tokens: 48_000,
            keep_recent_messages: 10,
            keep_tool_results: 5,
            max_planner_rounds: 12,
        }
    }
}
