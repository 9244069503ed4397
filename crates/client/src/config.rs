use std::str::FromStr;
use std::time::Duration;

/// Default streaming endpoint of the proxy service.
pub const DEFAULT_WS_URL: &str = "ws://localhost:6789";

/// Default cached-content endpoint of the proxy service.
pub const DEFAULT_CACHE_CONTENT_URL: &str = "http://localhost:5001/get_cached_content";

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Monitor client configuration loaded from environment variables.
///
/// Both endpoints are fixed for the life of the process; they are not
/// renegotiated per submission.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Streaming WebSocket endpoint (default: `ws://localhost:6789`).
    pub ws_url: String,
    /// Plain-text cached-content endpoint.
    pub cache_content_url: String,
    /// Silence after which a run is flagged as stalled. `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// Upper bound on the WebSocket handshake (default: 10 s).
    pub connect_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.into(),
            cache_content_url: DEFAULT_CACHE_CONTENT_URL.into(),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                                     |
    /// |------------------------|---------------------------------------------|
    /// | `MONITOR_WS_URL`       | `ws://localhost:6789`                       |
    /// | `CACHE_CONTENT_URL`    | `http://localhost:5001/get_cached_content`  |
    /// | `IDLE_TIMEOUT_SECS`    | `30` (`0` disables stall detection)         |
    /// | `CONNECT_TIMEOUT_SECS` | `10`                                        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let ws_url = lookup("MONITOR_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.into());
        require_scheme("MONITOR_WS_URL", &ws_url, &["ws://", "wss://"])?;

        let cache_content_url =
            lookup("CACHE_CONTENT_URL").unwrap_or_else(|| DEFAULT_CACHE_CONTENT_URL.into());
        require_scheme("CACHE_CONTENT_URL", &cache_content_url, &["http://", "https://"])?;

        let idle_secs: u64 = parse_var(&lookup, "IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS)?;
        let idle_timeout = (idle_secs > 0).then(|| Duration::from_secs(idle_secs));

        let connect_secs: u64 =
            parse_var(&lookup, "CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?;
        if connect_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "CONNECT_TIMEOUT_SECS",
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            ws_url,
            cache_content_url,
            idle_timeout,
            connect_timeout: Duration::from_secs(connect_secs),
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset or blank.
pub fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

fn require_scheme(var: &'static str, url: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    if schemes.iter().any(|scheme| url.starts_with(scheme)) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            var,
            reason: format!("\"{url}\" must start with one of {}", schemes.join(", ")),
        })
    }
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}
