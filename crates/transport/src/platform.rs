//! Capabilities supplied by the embedding runtime.

use std::collections::HashMap;

/// Source of the anti-forgery token, read by name at each connect attempt.
pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Runtime-specific transport policy.
pub trait Platform: Send + Sync {
    /// Whether a close with this code means the surrounding runtime is
    /// shutting down (tab closing, navigation). Such closes are treated
    /// as intentional: no reconnect, no status event.
    fn is_intentional_close(&self, code: u16) -> bool;
}

/// Default policy: close codes 1001 (going away) and 1011 are emitted by
/// some browser families when the page itself is navigating away.
#[derive(Debug, Default, Clone, Copy)]
pub struct NavigationAware;

impl Platform for NavigationAware {
    fn is_intentional_close(&self, code: u16) -> bool {
        matches!(code, 1001 | 1011)
    }
}

/// Fixed in-memory cookie store for embedders without an ambient one.
#[derive(Debug, Default, Clone)]
pub struct StaticCookies {
    cookies: HashMap<String, String>,
}

impl StaticCookies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }
}

impl CookieJar for StaticCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.cookies.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_codes_are_intentional() {
        let platform = NavigationAware;
        assert!(platform.is_intentional_close(1001));
        assert!(platform.is_intentional_close(1011));
        assert!(!platform.is_intentional_close(1000));
        assert!(!platform.is_intentional_close(1006));
    }

    #[test]
    fn static_cookies_lookup() {
        let jar = StaticCookies::new().with("xsrf", "t0k3n");
        assert_eq!(jar.get("xsrf").as_deref(), Some("t0k3n"));
        assert!(jar.get("other").is_none());
    }
}
