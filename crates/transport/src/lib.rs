//! Reconnecting realtime transport for uplink.
//!
//! One [`Session`] per logical client session: it owns the persistent
//! websocket connection, retries failures forever with a fixed backoff,
//! buffers outbound envelopes while disconnected, and re-publishes every
//! inbound frame through the [`uplink_dispatch::Hub`]. Lifecycle
//! transitions surface only as `connection-status-changed` hub events,
//! never as errors to callers.

pub mod config;
pub mod error;
pub mod platform;
pub mod queue;
pub mod session;
pub mod status;

pub use {
    config::SessionConfig,
    error::{Error, Result},
    platform::{CookieJar, NavigationAware, Platform, StaticCookies},
    queue::OutboundQueue,
    session::Session,
    status::StatusBroadcaster,
};
