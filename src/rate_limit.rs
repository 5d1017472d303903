// HandlerRateLimiter: per-path minimum-interval cooldowns, scoped to the
// calling session.
//
// Grounded on `bruteforce/timeout.go`'s `CheckTimeout`. Confirmed against
// the original: a path with no configured timeout entry is always allowed
// (lenient resolution) — there is no implicit default cooldown. The
// original consults the session's own last-handler-invocation map rather
// than keeping a separate limiter-owned store, so this does too: the
// pipeline passes the `Session` snapshot it already holds, and
// `SessionRegistry::register_activity` (run immediately after this check)
// is what actually advances `LastHandlers` for next time.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::session::Session;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

/// Default per-path cooldowns, seconds, matching the original's
/// hardcoded `timeout.go` table.
pub fn default_timeouts() -> HashMap<String, i64> {
    let mut map = HashMap::new();
    map.insert("/api/messages/send".to_string(), 10);
    map.insert("/api/filemanager/pack".to_string(), 10);
    map.insert("/api/filemanager/getarchive".to_string(), 10);
    map.insert("/api/support/bugreport".to_string(), 300);
    map
}

pub struct HandlerRateLimiter {
    timeouts: HashMap<String, i64>,
}

impl HandlerRateLimiter {
    pub fn new(timeouts: HashMap<String, i64>) -> Self {
        Self { timeouts }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_timeouts())
    }

    /// Returns `true` if `session` may call `path` right now. Paths with
    /// no configured cooldown are always allowed; a path the session has
    /// never hit is always allowed on first use.
    pub fn check(&self, path: &str, session: &Session) -> bool {
        let Some(&interval) = self.timeouts.get(path) else {
            return true;
        };

        match session.last_handlers.get(path) {
            None => true,
            Some(&last) => now_unix() - last > interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;

    fn session_with_handlers(handlers: HashMap<String, i64>) -> Session {
        let registry = SessionRegistry::new("sessionID", 24, 1800, true);
        let mut session = registry.start("1.2.3.4", "curl", "alice");
        session.last_handlers = handlers;
        session
    }

    #[test]
    fn unconfigured_path_is_always_allowed() {
        let limiter = HandlerRateLimiter::with_defaults();
        let session = session_with_handlers(HashMap::new());
        assert!(limiter.check("/api/dns/list", &session));
    }

    #[test]
    fn first_call_on_configured_path_is_allowed() {
        let limiter = HandlerRateLimiter::with_defaults();
        let session = session_with_handlers(HashMap::new());
        assert!(limiter.check("/api/messages/send", &session));
    }

    #[test]
    fn configured_path_rejects_within_cooldown() {
        let limiter = HandlerRateLimiter::with_defaults();
        let mut handlers = HashMap::new();
        handlers.insert("/api/messages/send".to_string(), now_unix());
        let session = session_with_handlers(handlers);
        assert!(!limiter.check("/api/messages/send", &session));
    }

    #[test]
    fn configured_path_allows_after_cooldown_elapses() {
        let mut timeouts = HashMap::new();
        timeouts.insert("/api/messages/send".to_string(), 0);
        let limiter = HandlerRateLimiter::new(timeouts);
        let mut handlers = HashMap::new();
        handlers.insert("/api/messages/send".to_string(), now_unix() - 1);
        let session = session_with_handlers(handlers);
        assert!(limiter.check("/api/messages/send", &session));
    }

    #[test]
    fn default_table_has_four_entries() {
        let timeouts = default_timeouts();
        assert_eq!(timeouts.len(), 4);
        assert_eq!(timeouts.get("/api/support/bugreport"), Some(&300));
    }
}
