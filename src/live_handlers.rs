// LiveHandlerSet: tracks in-flight handler invocations and enforces the
// per-user concurrency cap.
//
// Grounded on `types.go`'s `rhandler{id,URI,Username,IP,StartTime,SessionID}`
// and `Router`. The cap check is `count >= max`, not the original
// `CheckNumConnection`'s `count > max`: `MaxHandlersForUser = N` admits N
// concurrent handlers for a user and rejects the (N+1)-th. The id is a
// monotone counter, not a UUID — the original increments a plain int under
// the same lock that guards the map.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

#[derive(Debug, Clone)]
pub struct LiveHandler {
    pub id: u64,
    pub uri: String,
    pub username: String,
    pub ip: String,
    pub start_time: i64,
    pub session_id: String,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

struct Inner {
    handlers: HashMap<u64, LiveHandler>,
    next_id: u64,
}

pub struct LiveHandlerSet {
    inner: RwLock<Inner>,
    max_handlers_for_user: usize,
}

impl LiveHandlerSet {
    pub fn new(max_handlers_for_user: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                handlers: HashMap::new(),
                next_id: 1,
            }),
            max_handlers_for_user,
        }
    }

    pub fn count_for_user(&self, username: &str) -> usize {
        self.inner
            .read()
            .handlers
            .values()
            .filter(|h| h.username == username)
            .count()
    }

    /// Registers a new in-flight handler for `username`, rejecting it if
    /// that would exceed the per-user cap. Counting and insertion happen
    /// under a single write lock so two concurrent requests can never both
    /// slip past the boundary.
    pub fn register(
        &self,
        uri: impl Into<String>,
        username: impl Into<String>,
        ip: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<u64, usize> {
        let username = username.into();
        let mut inner = self.inner.write();

        let current = inner
            .handlers
            .values()
            .filter(|h| h.username == username)
            .count();
        if current >= self.max_handlers_for_user {
            return Err(current);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.insert(
            id,
            LiveHandler {
                id,
                uri: uri.into(),
                username,
                ip: ip.into(),
                start_time: now_unix(),
                session_id: session_id.into(),
            },
        );
        Ok(id)
    }

    pub fn deregister(&self, id: u64) {
        self.inner.write().handlers.remove(&id);
    }

    pub fn snapshot(&self) -> Vec<LiveHandler> {
        self.inner.read().handlers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RAII guard returned alongside a successful [`LiveHandlerSet::register`]
/// call by the pipeline, so the handler is always deregistered — even if
/// the wrapped handler panics or returns early.
pub struct LiveHandlerGuard<'a> {
    set: &'a LiveHandlerSet,
    id: u64,
}

impl<'a> LiveHandlerGuard<'a> {
    pub fn new(set: &'a LiveHandlerSet, id: u64) -> Self {
        Self { set, id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for LiveHandlerGuard<'_> {
    fn drop(&mut self) {
        self.set.deregister(self.id);
    }
}
