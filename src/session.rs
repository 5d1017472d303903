// SessionRegistry: owns the mapping from session id to Session, enforces
// optional strict-IP binding, and broadcasts live-update messages.
//
// Grounded on the original `sessions.Sessions` (map + sync.RWMutex) and on
// the donor's parking_lot::RwLock-guarded registries (e.g.
// `knhk-sidecar::circuit_breaker::CircuitBreakerRegistry`).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;

const ACTUALIZE_CHANNEL_CAPACITY: usize = 10;
const CLOSE_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no sessionID set in cookies")]
    NoSessionID,
    #[error("no session with given sessionID found")]
    NoSessionWithID,
    #[error("session's IP and current user's IP are not equal")]
    IpMismatch,
    #[error("no session with id {0} found")]
    NoSuchSession(String),
}

/// A file a session-owning user has uploaded but not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempFile {
    pub original_name: String,
    pub stored_name: String,
    pub created: i64,
    pub size: u64,
}

/// A session-scoped push channel used to notify a connected UI of state
/// changes (the "actualizer"). Cloning a `Session` clones the sender
/// handles, not the channel itself, so a close signal sent through any
/// clone reaches the one real listener task — mirroring the original's
/// pointer-shared `*ActualizeListener`. The receiver halves are not stored
/// here; `SessionRegistry::start` hands them to its own `listeners` table,
/// claimable once via [`SessionRegistry::take_listener`].
#[derive(Debug, Clone)]
pub struct ActualizeListener {
    pub message_tx: mpsc::Sender<String>,
    pub close_tx: mpsc::Sender<()>,
    pub is_listening: bool,
}

impl ActualizeListener {
    fn new() -> (Self, mpsc::Receiver<String>, mpsc::Receiver<()>) {
        let (message_tx, message_rx) = mpsc::channel(ACTUALIZE_CHANNEL_CAPACITY);
        let (close_tx, close_rx) = mpsc::channel(CLOSE_CHANNEL_CAPACITY);
        (
            Self {
                message_tx,
                close_tx,
                is_listening: false,
            },
            message_rx,
            close_rx,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub ip: String,
    pub username: String,
    pub user_agent: String,
    pub created: i64,
    pub last_activity: i64,
    pub theme: String,
    pub language: String,
    pub template: String,
    pub uploads: Vec<TempFile>,
    pub actualizer: ActualizeListener,
    pub last_handlers: HashMap<String, i64>,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

type ListenerChannels = (mpsc::Receiver<String>, mpsc::Receiver<()>);

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    /// Receiver halves of each session's actualizer channel, claimable once
    /// by whatever handler ends up servicing that session's long-poll
    /// connection (e.g. `/api/info/actualizer/`). Kept out of `Session`
    /// itself since `mpsc::Receiver` is neither `Clone` nor safe to hand out
    /// more than once.
    listeners: Mutex<HashMap<String, ListenerChannels>>,
    session_id_key: String,
    session_id_key_length: usize,
    session_life_time: i64,
    strict_ip: bool,
}

impl SessionRegistry {
    pub fn new(
        session_id_key: impl Into<String>,
        session_id_key_length: usize,
        session_life_time: i64,
        strict_ip: bool,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            session_id_key: session_id_key.into(),
            session_id_key_length,
            session_life_time,
            strict_ip,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.session_id_key
    }

    fn generate_session_id(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.session_id_key_length)
            .map(char::from)
            .collect()
    }

    /// Creates a fresh session for `username` with `ip`/`user_agent` taken
    /// from the request, stores it, and returns a copy together with the
    /// freshly generated cookie value the caller should set on the
    /// response (the HTTP cookie-writing itself is left to the pipeline,
    /// since cookie semantics belong to the routing layer, not the
    /// registry).
    pub fn start(&self, ip: impl Into<String>, user_agent: impl Into<String>, username: impl Into<String>) -> Session {
        let id = loop {
            let candidate = self.generate_session_id();
            if !self.sessions.read().contains_key(&candidate) {
                break candidate;
            }
        };

        let (actualizer, message_rx, close_rx) = ActualizeListener::new();
        let now = now_unix();
        let session = Session {
            id: id.clone(),
            ip: ip.into(),
            username: username.into(),
            user_agent: user_agent.into(),
            created: now,
            last_activity: now,
            theme: String::new(),
            language: String::new(),
            template: String::new(),
            uploads: Vec::new(),
            actualizer,
            last_handlers: HashMap::new(),
        };

        self.listeners.lock().insert(id.clone(), (message_rx, close_rx));
        self.sessions.write().insert(id, session.clone());
        session
    }

    /// Claims the receiver halves of `session_id`'s actualizer channel for
    /// a long-poll handler to read from. Returns `None` if the session
    /// doesn't exist or its channel was already claimed — each session's
    /// channel has exactly one real listener, mirroring the original's
    /// pointer-shared `*ActualizeListener`.
    pub fn take_listener(&self, session_id: &str) -> Option<ListenerChannels> {
        self.listeners.lock().remove(session_id)
    }

    /// Looks up the session for `session_id`, validating strict-IP binding
    /// against `remote_ip` if enabled. Returns a deep copy.
    pub fn get_by_id(&self, session_id: &str, remote_ip: &str) -> Result<Session, SessionError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(session_id)
            .ok_or(SessionError::NoSessionWithID)?;

        if self.strict_ip && session.ip != remote_ip {
            return Err(SessionError::IpMismatch);
        }

        Ok(session.clone())
    }

    /// Convenience wrapper taking the raw cookie header value (`None` means
    /// the cookie was absent, yielding `NoSessionID`).
    pub fn get(&self, cookie_value: Option<&str>, remote_ip: &str) -> Result<Session, SessionError> {
        let id = cookie_value.ok_or(SessionError::NoSessionID)?;
        self.get_by_id(id, remote_ip)
    }

    pub fn is_exist(&self, cookie_value: Option<&str>) -> bool {
        match cookie_value {
            Some(id) => self.sessions.read().contains_key(id),
            None => false,
        }
    }

    /// Replaces the stored session entirely. Fails if no session with that
    /// id exists.
    pub fn set(&self, session: Session) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        if !sessions.contains_key(&session.id) {
            return Err(SessionError::NoSessionWithID);
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub fn register_activity(&self, session_id: &str, request_uri: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NoSuchSession(session_id.to_string()))?;
        let now = now_unix();
        session.last_activity = now;
        session.last_handlers.insert(request_uri.to_string(), now);
        Ok(())
    }

    pub fn listen_actualizer(&self, session_id: &str, is_listening: bool) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NoSuchSession(session_id.to_string()))?;
        session.actualizer.is_listening = is_listening;
        Ok(())
    }

    pub fn add_temp_file(&self, session_id: &str, file: TempFile) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NoSuchSession(session_id.to_string()))?;
        session.uploads.push(file);
        Ok(())
    }

    pub fn clear_temp_files(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NoSuchSession(session_id.to_string()))?;
        session.uploads.clear();
        Ok(())
    }

    pub fn get_temp_files(&self, session_id: &str) -> Result<Vec<TempFile>, SessionError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::NoSuchSession(session_id.to_string()))?;
        Ok(session.uploads.clone())
    }

    /// Two-phase scan-then-delete: collects expired session ids under the
    /// read lock, then deletes each one, so the write lock is never held
    /// across multiple deletions. Safe to call concurrently with
    /// `get`/`start`, and idempotent — calling it twice back to back is a
    /// no-op the second time.
    pub fn clean_expired(&self) {
        let now = now_unix();
        let expired: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(_, s)| now - s.last_activity >= self.session_life_time)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in expired {
            self.del_by_id(&id);
        }
    }

    /// Atomically removes the session, sending a non-blocking close signal
    /// to its listener first. Silent (log-only) if the session is already
    /// gone.
    pub fn del_by_id(&self, session_id: &str) {
        let mut sessions = self.sessions.write();
        match sessions.remove(session_id) {
            Some(session) => {
                let _ = session.actualizer.close_tx.try_send(());
                self.listeners.lock().remove(session_id);
            }
            None => {
                tracing::debug!(session_id, "attempted to remove a nonexistent session");
            }
        }
    }

    /// Enqueues `message` on the channel of every session owned by
    /// `username` whose listener is actively listening. The channel is
    /// bounded and non-blocking: a full channel drops the message, which
    /// is acceptable backpressure for live-UI hints.
    pub fn actualize(&self, username: &str, message: &str) {
        let sessions = self.sessions.read();
        for session in sessions.values() {
            if session.username == username && session.actualizer.is_listening {
                let _ = session.actualizer.message_tx.try_send(message.to_string());
            }
        }
    }

    pub fn snapshot(&self) -> HashMap<String, Session> {
        self.sessions.read().clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodically invokes [`SessionRegistry::clean_expired`]. Intended to be
/// spawned once alongside the server; the pipeline also calls
/// `clean_expired` inline on every admitted request, so this is a
/// belt-and-suspenders sweep for idle periods with no traffic.
pub async fn spawn_expiry_sweeper(registry: std::sync::Arc<SessionRegistry>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        registry.clean_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new("sessionID", 24, 1800, true)
    }

    #[test]
    fn start_creates_unique_session_with_consistent_timestamps() {
        let reg = registry();
        let s1 = reg.start("1.2.3.4", "curl", "alice");
        let s2 = reg.start("1.2.3.4", "curl", "alice");
        assert_ne!(s1.id, s2.id);
        assert_eq!(s1.id.len(), 24);
        assert!(s1.last_activity >= s1.created);
    }

    #[test]
    fn get_fails_without_cookie() {
        let reg = registry();
        let err = reg.get(None, "1.2.3.4").unwrap_err();
        assert_eq!(err, SessionError::NoSessionID);
    }

    #[test]
    fn get_fails_for_unknown_id() {
        let reg = registry();
        let err = reg.get(Some("bogus"), "1.2.3.4").unwrap_err();
        assert_eq!(err, SessionError::NoSessionWithID);
    }

    #[test]
    fn strict_ip_mismatch_is_rejected() {
        let reg = registry();
        let s = reg.start("1.2.3.4", "curl", "alice");
        let err = reg.get(Some(&s.id), "9.9.9.9").unwrap_err();
        assert_eq!(err, SessionError::IpMismatch);
    }

    #[test]
    fn strict_ip_disabled_allows_ip_change() {
        let reg = SessionRegistry::new("sessionID", 24, 1800, false);
        let s = reg.start("1.2.3.4", "curl", "alice");
        assert!(reg.get(Some(&s.id), "9.9.9.9").is_ok());
    }

    #[test]
    fn get_returns_independent_copy() {
        let reg = registry();
        let s = reg.start("1.2.3.4", "curl", "alice");
        let mut copy = reg.get(Some(&s.id), "1.2.3.4").unwrap();
        copy.username = "mutated".to_string();
        let fresh = reg.get(Some(&s.id), "1.2.3.4").unwrap();
        assert_eq!(fresh.username, "alice");
    }

    #[test]
    fn register_activity_updates_last_activity_and_handlers() {
        let reg = registry();
        let s = reg.start("1.2.3.4", "curl", "alice");
        reg.register_activity(&s.id, "/api/dns/list").unwrap();
        let refreshed = reg.get(Some(&s.id), "1.2.3.4").unwrap();
        assert!(refreshed.last_handlers.contains_key("/api/dns/list"));
    }

    #[test]
    fn clean_expired_is_idempotent() {
        let reg = SessionRegistry::new("sessionID", 24, 0, true);
        let s = reg.start("1.2.3.4", "curl", "alice");
        std::thread::sleep(std::time::Duration::from_millis(10));
        reg.clean_expired();
        assert!(reg.get(Some(&s.id), "1.2.3.4").is_err());
        reg.clean_expired();
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn del_by_id_is_silent_on_missing_session() {
        let reg = registry();
        reg.del_by_id("does-not-exist");
    }

    #[test]
    fn set_replaces_existing_session() {
        let reg = registry();
        let mut s = reg.start("1.2.3.4", "curl", "alice");
        s.theme = "dark".to_string();
        reg.set(s.clone()).unwrap();
        let fetched = reg.get(Some(&s.id), "1.2.3.4").unwrap();
        assert_eq!(fetched.theme, "dark");
    }

    #[test]
    fn set_fails_for_unknown_session() {
        let reg = registry();
        let fake = Session {
            id: "ghost".to_string(),
            ip: "1.2.3.4".to_string(),
            username: "nobody".to_string(),
            user_agent: String::new(),
            created: 0,
            last_activity: 0,
            theme: String::new(),
            language: String::new(),
            template: String::new(),
            uploads: Vec::new(),
            actualizer: ActualizeListener::new().0,
            last_handlers: HashMap::new(),
        };
        assert!(reg.set(fake).is_err());
    }

    #[test]
    fn take_listener_can_only_be_claimed_once() {
        let reg = registry();
        let s = reg.start("1.2.3.4", "curl", "alice");
        assert!(reg.take_listener(&s.id).is_some());
        assert!(reg.take_listener(&s.id).is_none());
    }

    #[tokio::test]
    async fn actualize_delivers_message_to_claimed_listener() {
        let reg = registry();
        let s = reg.start("1.2.3.4", "curl", "alice");
        reg.listen_actualizer(&s.id, true).unwrap();
        let (mut messages, _close) = reg.take_listener(&s.id).unwrap();
        reg.actualize("alice", "your report is ready");
        assert_eq!(messages.recv().await.unwrap(), "your report is ready");
    }

    #[tokio::test]
    async fn del_by_id_signals_close_to_claimed_listener() {
        let reg = registry();
        let s = reg.start("1.2.3.4", "curl", "alice");
        let (_messages, mut close) = reg.take_listener(&s.id).unwrap();
        reg.del_by_id(&s.id);
        assert!(close.recv().await.is_some());
    }

    #[test]
    fn temp_files_round_trip() {
        let reg = registry();
        let s = reg.start("1.2.3.4", "curl", "alice");
        reg.add_temp_file(
            &s.id,
            TempFile {
                original_name: "report.csv".to_string(),
                stored_name: "tmp-1".to_string(),
                created: 0,
                size: 128,
            },
        )
        .unwrap();
        assert_eq!(reg.get_temp_files(&s.id).unwrap().len(), 1);
        reg.clear_temp_files(&s.id).unwrap();
        assert!(reg.get_temp_files(&s.id).unwrap().is_empty());
    }
}
