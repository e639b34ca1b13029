//! Wire protocol for the uplink realtime notification transport.
//!
//! All traffic is JSON envelopes over a WebSocket. The envelope shape is
//! symmetric: server-push notifications, client heartbeats, and
//! client-originated broadcasts all use `{ "type": ..., "event": ... }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Constants ────────────────────────────────────────────────────────────────

/// Heartbeat interval while a connection is live.
pub const PING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);
/// Delay before retrying a connection that never became live.
pub const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(50);
/// Shorter retry delay used when the embedder runs in development mode.
pub const DEV_RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

/// Length of the per-tab session identity token.
pub const SESSION_ID_LEN: usize = 10;
/// Query parameter carrying the session identity on the connection URL.
pub const SESSION_ID_PARAM: &str = "sessionId";
/// Wire key injected into every outbound payload by the send path.
pub const SESSION_ID_KEY: &str = "webSocketSessionId";
/// Wire key asking the server to redeliver a broadcast to its originator.
pub const ECHO_KEY: &str = "echoToSelf";

/// Dispatch type used for transport lifecycle status events.
pub const STATUS_EVENT: &str = "connection-status-changed";

/// Placeholder sub-protocol the server is expected to select.
///
/// WebSockets cannot carry custom headers, so the anti-forgery token rides
/// in the sub-protocol list next to this placeholder entry.
pub const PLACEHOLDER_SUBPROTOCOL: &str = "dummy";
/// Prefix of the sub-protocol entry carrying the anti-forgery token.
pub const XSRF_SUBPROTOCOL_PREFIX: &str = "xsrf-";

/// Build the two-entry sub-protocol list for the connection handshake.
#[must_use]
pub fn handshake_subprotocols(xsrf_token: &str) -> String {
    format!("{PLACEHOLDER_SUBPROTOCOL}, {XSRF_SUBPROTOCOL_PREFIX}{xsrf_token}")
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// The `{ type, event }` message shape used for all inbound and outbound
/// traffic. A missing `event` deserializes to an empty object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub r#type: String,
    #[serde(default = "empty_event")]
    pub event: Value,
}

fn empty_event() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Envelope {
    pub fn new(r#type: impl Into<String>, event: Value) -> Self {
        Self {
            r#type: r#type.into(),
            event,
        }
    }

    /// Heartbeat frame. Carries the session identity so the server can key
    /// the connection even before any application traffic flows.
    #[must_use]
    pub fn ping(session_id: &str) -> Self {
        let mut event = serde_json::Map::new();
        event.insert(
            SESSION_ID_KEY.to_string(),
            Value::String(session_id.to_string()),
        );
        Self {
            r#type: "ping".to_string(),
            event: Value::Object(event),
        }
    }

    /// Keepalive chatter is dispatched like any other type but excluded
    /// from debug-level logging.
    #[must_use]
    pub fn is_chatter(&self) -> bool {
        matches!(self.r#type.as_str(), "ping" | "pong" | "watch-triggered")
    }
}

// ── Status events ────────────────────────────────────────────────────────────

/// Transport lifecycle transition codes, published under [`STATUS_EVENT`].
///
/// The set is closed in practice but marked non-exhaustive so consumers
/// match with a fallback arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum StatusCode {
    ConnectionLost,
    ConnectionFailed,
    ConnectionEstablished,
}

/// Payload of a [`STATUS_EVENT`] dispatch.
///
/// `reason` is display-only; consumers branch on `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub code: StatusCode,
    pub reason: String,
}

impl StatusEvent {
    pub fn new(code: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let envelope = Envelope::new("job-progress", serde_json::json!({"pct": 40}));
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn missing_event_defaults_to_empty_object() {
        let parsed: Envelope = serde_json::from_str(r#"{"type":"bar"}"#).unwrap();
        assert_eq!(parsed.r#type, "bar");
        assert_eq!(parsed.event, serde_json::json!({}));
    }

    #[test]
    fn ping_carries_session_id() {
        let ping = Envelope::ping("abc123XYZ0");
        assert_eq!(ping.r#type, "ping");
        assert_eq!(ping.event[SESSION_ID_KEY], "abc123XYZ0");
    }

    #[test]
    fn chatter_types() {
        assert!(Envelope::new("ping", serde_json::json!({})).is_chatter());
        assert!(Envelope::new("pong", serde_json::json!({})).is_chatter());
        assert!(Envelope::new("watch-triggered", serde_json::json!({})).is_chatter());
        assert!(!Envelope::new("job-progress", serde_json::json!({})).is_chatter());
    }

    #[test]
    fn status_codes_serialize_screaming_snake() {
        let event = StatusEvent::new(StatusCode::ConnectionLost, "gone");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["code"], "CONNECTION_LOST");
        assert_eq!(json["reason"], "gone");

        let parsed: StatusEvent =
            serde_json::from_value(serde_json::json!({"code": "CONNECTION_ESTABLISHED", "reason": "up"}))
                .unwrap();
        assert_eq!(parsed.code, StatusCode::ConnectionEstablished);
    }

    #[test]
    fn subprotocol_list_shape() {
        assert_eq!(handshake_subprotocols("t0k3n"), "dummy, xsrf-t0k3n");
    }
}
