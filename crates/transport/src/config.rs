use std::time::Duration;

use uplink_protocol::{DEV_RECONNECT_DELAY, PING_INTERVAL, RECONNECT_DELAY};

/// Configuration for a transport session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `wss://host/dip/websocket`. The session
    /// identity is appended as a query parameter at connect time.
    pub ws_url: String,
    /// Name of the anti-forgery cookie read at each connect attempt.
    pub xsrf_cookie_name: String,
    /// Development-mode runtimes retry failed connections sooner.
    pub dev_mode: bool,
    /// Heartbeat interval while connected.
    pub ping_interval: Duration,
    /// Retry delay after an attempt that never became live.
    pub reconnect_delay: Duration,
    /// Retry delay in development mode.
    pub dev_reconnect_delay: Duration,
}

impl SessionConfig {
    pub fn new(ws_url: impl Into<String>, xsrf_cookie_name: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            xsrf_cookie_name: xsrf_cookie_name.into(),
            dev_mode: false,
            ping_interval: PING_INTERVAL,
            reconnect_delay: RECONNECT_DELAY,
            dev_reconnect_delay: DEV_RECONNECT_DELAY,
        }
    }

    /// Delay before retrying an attempt that never reached the live state.
    /// A drop from a live connection retries immediately instead.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        if self.dev_mode {
            self.dev_reconnect_delay
        } else {
            self.reconnect_delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_come_from_wire_constants() {
        let config = SessionConfig::new("ws://localhost/ws", "xsrf-token");
        assert!(!config.dev_mode);
        assert_eq!(config.ping_interval, PING_INTERVAL);
        assert_eq!(config.reconnect_delay, RECONNECT_DELAY);
        assert_eq!(config.dev_reconnect_delay, DEV_RECONNECT_DELAY);
    }

    #[test]
    fn retry_delay_follows_runtime_mode() {
        let mut config = SessionConfig::new("ws://localhost/ws", "xsrf-token");
        assert_eq!(config.retry_delay(), RECONNECT_DELAY);
        config.dev_mode = true;
        assert_eq!(config.retry_delay(), DEV_RECONNECT_DELAY);
        assert!(!config.retry_delay().is_zero());
    }
}
