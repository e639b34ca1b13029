//! Translates transport lifecycle transitions into hub events.
//!
//! UI-side consumers (a disconnected banner, cache invalidation) react to
//! [`STATUS_EVENT`] dispatches and never touch the transport directly.

use std::sync::Arc;

use serde_json::Value;

use {
    uplink_dispatch::Hub,
    uplink_protocol::{STATUS_EVENT, StatusCode, StatusEvent},
};

pub struct StatusBroadcaster {
    hub: Arc<Hub>,
}

impl StatusBroadcaster {
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    pub fn established(&self) {
        self.emit(StatusCode::ConnectionEstablished, "Connection established");
    }

    pub fn lost(&self, reason: &str) {
        self.emit(StatusCode::ConnectionLost, reason);
    }

    pub fn failed(&self, reason: &str) {
        self.emit(StatusCode::ConnectionFailed, reason);
    }

    fn emit(&self, code: StatusCode, reason: &str) {
        let payload =
            serde_json::to_value(StatusEvent::new(code, reason)).unwrap_or(Value::Null);
        self.hub.publish_local(STATUS_EVENT, Some(payload));
    }
}
