// ApiTrigger: fire-and-forget child-process hooks run after a handler
// completes.
//
// Grounded on `api/api.go`/`api/types.go` (apiTrigger{Triggers,*sync.Mutex},
// readDir, hasTrigger, newAPICall, Call{Session,Get,Post,Stdin}). A trigger
// is a small external script registered by dropping an executable file in
// the trigger directory; this layer never inspects or runs arbitrary paths,
// only files discovered by `scan`. A trigger call must never block request
// handling or mutate the session, so it is always spawned onto its own
// task with an enforced timeout, and it receives a serialized snapshot of
// the session rather than any live handle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::session::Session;

/// Default ceiling on how long a trigger process may run before it is
/// killed and the call treated as failed. Not present in the original,
/// which relies on the OS and operator discipline; an unbounded
/// fire-and-forget process is a latent resource leak, so this layer
/// enforces one explicitly.
pub const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct SessionSnapshot<'a> {
    id: &'a str,
    username: &'a str,
    ip: &'a str,
}

impl<'a> From<&'a Session> for SessionSnapshot<'a> {
    fn from(s: &'a Session) -> Self {
        Self {
            id: &s.id,
            username: &s.username,
            ip: &s.ip,
        }
    }
}

/// Mirrors the original's `Call{Session, Get, Post, Stdin}` wire shape:
/// `Get`/`Post` are flattened query/form parameter maps (`newAPICall`'s
/// `getQueryParamsMap`, which concatenates repeated values for the same
/// key) and `Stdin` is the request body decoded as arbitrary JSON.
#[derive(Debug, Serialize)]
pub struct Call<'a> {
    #[serde(rename = "Session")]
    session: Option<SessionSnapshot<'a>>,
    #[serde(rename = "Get")]
    get: HashMap<String, String>,
    #[serde(rename = "Post")]
    post: HashMap<String, String>,
    #[serde(rename = "Stdin")]
    stdin: Value,
}

impl<'a> Call<'a> {
    pub fn new(
        session: &'a Session,
        get: HashMap<String, String>,
        post: HashMap<String, String>,
        stdin: Value,
    ) -> Self {
        Self {
            session: Some(session.into()),
            get,
            post,
            stdin,
        }
    }

    /// For trigger calls with no session yet (the login endpoint).
    pub fn without_session(get: HashMap<String, String>, post: HashMap<String, String>, stdin: Value) -> Self {
        Self {
            session: None,
            get,
            post,
            stdin,
        }
    }
}

pub struct ApiTrigger {
    dir: PathBuf,
    timeout: Duration,
    triggers: Mutex<HashMap<String, i32>>,
}

impl ApiTrigger {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
            triggers: Mutex::new(HashMap::new()),
        }
    }

    /// Rescans the trigger directory, registering any newly discovered
    /// executable at an invocation count of zero. Existing counts are
    /// preserved. Walks subdirectories recursively, the way `readDir` does,
    /// naming each trigger by its path relative to the trigger directory
    /// root (e.g. `dns/on_create`).
    pub fn scan(&self) -> std::io::Result<()> {
        let mut triggers = self.triggers.lock();
        if !self.dir.exists() {
            return Ok(());
        }
        for name in scan_dir(&self.dir, &self.dir)? {
            triggers.entry(name).or_insert(0);
        }
        Ok(())
    }

    pub fn has_trigger(&self, name: &str) -> bool {
        self.triggers.lock().contains_key(name)
    }

    pub fn trigger_count(&self, name: &str) -> i32 {
        self.triggers.lock().get(name).copied().unwrap_or(0)
    }

    fn trigger_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Runs the named trigger if registered. Never returns an error to the
    /// caller for trigger-side failures (missing trigger, spawn failure,
    /// timeout, nonzero exit) — those are logged and swallowed, since a
    /// trigger is a best-effort side channel and must never fail the
    /// request it rides on.
    pub async fn call(&self, name: &str, call: &Call<'_>) {
        if !self.has_trigger(name) {
            return;
        }

        {
            let mut triggers = self.triggers.lock();
            if let Some(count) = triggers.get_mut(name) {
                *count += 1;
            }
        }

        let path = self.trigger_path(name);
        let payload = match serde_json::to_vec(call) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(trigger = name, error = %e, "failed to encode trigger payload");
                return;
            }
        };

        let result = timeout(self.timeout, run_trigger(&path, payload)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(trigger = name, error = %e, "trigger process failed"),
            Err(_) => tracing::warn!(trigger = name, timeout = ?self.timeout, "trigger process timed out"),
        }
    }
}

/// Recursively collects extension-less files under `dir`, naming each one
/// by its path relative to `root`. Trigger scripts are conventionally
/// dropped without an extension; anything with one (`.bak`, `.disabled`,
/// ...) is skipped, matching `readDir`'s `filepath.Ext(v.Name()) != ""`
/// filter.
fn scan_dir(root: &Path, dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            names.extend(scan_dir(root, &path)?);
        } else if path.extension().is_none() {
            if let Ok(relative) = path.strip_prefix(root) {
                if let Some(name) = relative.to_str() {
                    names.push(name.to_string());
                }
            }
        }
    }
    Ok(names)
}

async fn run_trigger(path: &Path, payload: Vec<u8>) -> std::io::Result<()> {
    let mut child = Command::new(path)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&payload).await?;
    }

    child.wait().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;

    #[test]
    fn scan_registers_files_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("on_login"), "#!/bin/sh\n").unwrap();
        std::fs::write(dir.path().join("on_login.bak"), "#!/bin/sh\n").unwrap();
        let trigger = ApiTrigger::new(dir.path(), DEFAULT_TRIGGER_TIMEOUT);
        trigger.scan().unwrap();
        assert!(trigger.has_trigger("on_login"));
        assert!(!trigger.has_trigger("on_login.bak"));
        assert_eq!(trigger.trigger_count("on_login"), 0);
    }

    #[test]
    fn scan_registers_nested_files_by_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("dns")).unwrap();
        std::fs::write(dir.path().join("dns").join("on_create"), "#!/bin/sh\n").unwrap();
        let trigger = ApiTrigger::new(dir.path(), DEFAULT_TRIGGER_TIMEOUT);
        trigger.scan().unwrap();
        let expected = Path::new("dns").join("on_create");
        assert!(trigger.has_trigger(expected.to_str().unwrap()));
    }

    #[test]
    fn missing_directory_scans_to_empty() {
        let trigger = ApiTrigger::new("/nonexistent/path/for/shm-guard-tests", DEFAULT_TRIGGER_TIMEOUT);
        trigger.scan().unwrap();
        assert!(!trigger.has_trigger("anything"));
    }

    #[tokio::test]
    async fn call_on_unregistered_trigger_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let trigger = ApiTrigger::new(dir.path(), DEFAULT_TRIGGER_TIMEOUT);
        let registry = SessionRegistry::new("sessionID", 24, 1800, true);
        let session = registry.start("1.2.3.4", "curl", "alice");
        let call = Call::new(&session, HashMap::new(), HashMap::new(), Value::Null);
        trigger.call("nope", &call).await;
        assert_eq!(trigger.trigger_count("nope"), 0);
    }
}
