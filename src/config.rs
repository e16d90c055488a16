use std::time::Duration;

use crate::retry::ReconnectPolicy;

/// Client configuration, read from the environment (the binary loads `.env`
/// first via dotenvy).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST collaborator, e.g. `http://localhost:3000/api`.
    pub api_base: String,
    /// Base URL for the streaming endpoint (`{stream_base}/stream?...`).
    pub stream_base: String,
    /// WebSocket base, e.g. `ws://localhost:3000`; derived from `stream_base`
    /// when not set explicitly.
    pub ws_base: String,
    /// Bound on the time a connection attempt may take before it counts as a
    /// failed attempt.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let stream_base = "http://localhost:3000".to_string();
        Self {
            api_base: "http://localhost:3000/api".to_string(),
            ws_base: http_to_ws(&stream_base),
            stream_base,
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Builds a config from `CHAT_*` environment variables, falling back to
    /// localhost defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_base =
            std::env::var("CHAT_API_BASE_URL").unwrap_or(defaults.api_base);
        let stream_base =
            std::env::var("CHAT_STREAM_BASE_URL").unwrap_or(defaults.stream_base);
        let ws_base = std::env::var("CHAT_WS_BASE_URL")
            .unwrap_or_else(|_| http_to_ws(&stream_base));

        let connect_timeout = env_parse("CHAT_CONNECT_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.connect_timeout);

        let reconnect = ReconnectPolicy::new(
            env_parse("CHAT_RECONNECT_MAX_ATTEMPTS")
                .unwrap_or(defaults.reconnect.max_attempts),
            env_parse("CHAT_RECONNECT_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect.base_delay),
        );

        Self { api_base, stream_base, ws_base, connect_timeout, reconnect }
    }
}

fn http_to_ws(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
