//! Client configuration from environment variables

use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8001";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_TICK_MS: u64 = 100;

/// Runtime settings for the council client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend base URL
    pub api_url: String,
    /// Default web search flag for turns
    pub web_search: bool,
    /// Conversation to resume; a new one is created when unset
    pub conversation_id: Option<String>,
    pub connect_timeout: Duration,
    /// Stage timer refresh period
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            web_search: false,
            conversation_id: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparsable values fall back to
    /// defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            api_url: non_empty("COUNCIL_API_URL").unwrap_or(defaults.api_url),
            web_search: non_empty("COUNCIL_WEB_SEARCH").is_some_and(|v| parse_flag(&v)),
            conversation_id: non_empty("COUNCIL_CONVERSATION_ID"),
            connect_timeout: non_empty("COUNCIL_CONNECT_TIMEOUT_SECS")
                .and_then(|v| parse_u64("COUNCIL_CONNECT_TIMEOUT_SECS", &v))
                .map_or(defaults.connect_timeout, Duration::from_secs),
            tick_interval: non_empty("COUNCIL_TICK_MS")
                .and_then(|v| parse_u64("COUNCIL_TICK_MS", &v))
                .filter(|ms| *ms > 0)
                .map_or(defaults.tick_interval, Duration::from_millis),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_u64(key: &str, value: &str) -> Option<u64> {
    match value.trim().parse() {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(key, value, error = %e, "Ignoring invalid config value");
            None
        }
    }
}
