//! Configuration for the Pulsewatch client

use std::time::Duration;

/// Environment variable holding the REST API base URL
pub const ENV_API_URL: &str = "PULSEWATCH_API_URL";
/// Environment variable holding the live channel URL
pub const ENV_CHANNEL_URL: &str = "PULSEWATCH_CHANNEL_URL";
/// Environment variable overriding the request timeout, in seconds
pub const ENV_REQUEST_TIMEOUT: &str = "PULSEWATCH_REQUEST_TIMEOUT_SECS";

/// Configuration shared by the request client and the connection manager
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST API base URL (e.g., "https://monitor.example.com/api")
    pub api_url: String,

    /// Live channel URL (e.g., "wss://monitor.example.com/ws")
    pub channel_url: String,

    /// Timeout applied to every request, renewal included
    pub request_timeout: Duration,

    /// Origin-relative path tried once when login fails with a gateway error
    pub login_fallback_path: String,

    /// Initial delay before reconnecting
    pub reconnect_delay: Duration,

    /// Maximum delay between reconnection attempts
    pub max_reconnect_delay: Duration,

    /// Reconnection attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Time allowed for opening the channel and completing its handshake
    pub connect_timeout: Duration,

    /// Interval between keepalive pings
    pub ping_interval: Duration,
}

impl ClientConfig {
    /// Create a new configuration with the given API and channel URLs
    pub fn new(api_url: impl Into<String>, channel_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            channel_url: channel_url.into(),
            request_timeout: Duration::from_secs(60),
            login_fallback_path: "/api/auth/login".to_string(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            connect_timeout: Duration::from_secs(20),
            ping_interval: Duration::from_secs(25),
        }
    }

    /// Create a configuration whose channel URL is the API URL's `/ws` sibling
    pub fn for_api_url(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into();
        let channel_url = default_channel_url(&api_url);
        Self::new(api_url, channel_url)
    }

    /// Build a configuration from `PULSEWATCH_*` environment variables.
    ///
    /// Returns `None` when the API URL is not set. The channel URL defaults to
    /// the API URL's `/ws` sibling.
    pub fn from_env() -> Option<Self> {
        let api_url = std::env::var(ENV_API_URL).ok()?;
        let channel_url = std::env::var(ENV_CHANNEL_URL)
            .ok()
            .unwrap_or_else(|| default_channel_url(&api_url));

        let mut config = Self::new(api_url, channel_url);
        if let Some(secs) = std::env::var(ENV_REQUEST_TIMEOUT)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.request_timeout = Duration::from_secs(secs);
        }
        Some(config)
    }

    /// Set the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the origin-relative login fallback path
    pub fn login_fallback_path(mut self, path: impl Into<String>) -> Self {
        self.login_fallback_path = path.into();
        self
    }

    /// Set the reconnection delay range
    pub fn reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    /// Set the number of reconnection attempts before the channel fails
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the connect/handshake timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the ping interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}

/// `http(s)://host/api` -> `ws(s)://host/ws`
fn default_channel_url(api_url: &str) -> String {
    match url::Url::parse(api_url) {
        Ok(mut url) => {
            let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
            let _ = url.set_scheme(scheme);
            url.set_path("/ws");
            url.set_query(None);
            url.to_string()
        }
        Err(_) => api_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_defaults() {
        let config = ClientConfig::new("http://localhost:5000/api", "ws://localhost:5000/ws");

        assert_eq!(config.api_url, "http://localhost:5000/api");
        assert_eq!(config.channel_url, "ws://localhost:5000/ws");
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.login_fallback_path, "/api/auth/login");
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.ping_interval, Duration::from_secs(25));
    }

    #[test]
    fn test_config_builder_chain() {
        let config = ClientConfig::new("http://a/api", "ws://a/ws")
            .request_timeout(Duration::from_secs(5))
            .reconnect_delay(Duration::from_millis(500), Duration::from_secs(60))
            .max_reconnect_attempts(3)
            .connect_timeout(Duration::from_secs(2))
            .ping_interval(Duration::from_secs(10))
            .login_fallback_path("/login");

        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(60));
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.login_fallback_path, "/login");
    }

    #[test]
    fn test_default_channel_url() {
        assert_eq!(
            default_channel_url("http://localhost:5000/api"),
            "ws://localhost:5000/ws"
        );
        assert_eq!(
            default_channel_url("https://monitor.example.com/api/v1?x=1"),
            "wss://monitor.example.com/ws"
        );
        assert_eq!(default_channel_url("not a url"), "not a url");
    }

    #[test]
    fn test_for_api_url() {
        let config = ClientConfig::for_api_url("https://monitor.example.com/api");
        assert_eq!(config.api_url, "https://monitor.example.com/api");
        assert_eq!(config.channel_url, "wss://monitor.example.com/ws");
    }
}
