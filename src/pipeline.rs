// AdmissionPipeline: the axum middleware that reproduces `ghttp.go`'s
// `HandleInternalFunc` (the full 15-step gate) and `HandleLoginFunc` (the
// reduced gate used only by the login endpoint, which by definition cannot
// yet have a session: only steps 2, 3, 14, 15 apply).
//
// Grounded on `rust/knhk-workflow-engine/src/api/middleware.rs`'s
// `Fortune5Middleware` for the axum `from_fn`/`Next`/`HeaderMap` shape, and
// on `ghttp.go` for the exact step ordering, response codes, and headers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;

use crate::brute::BruteShield;
use crate::error::AppError;
use crate::journal::{Journal, Operation};
use crate::kv::KvStore;
use crate::live_handlers::{LiveHandlerGuard, LiveHandlerSet};
use crate::module_path::get_current_module;
use crate::rate_limit::HandlerRateLimiter;
use crate::session::SessionRegistry;
use crate::shutdown::ShutdownWatcher;
use crate::template::UserTemplateStore;
use crate::trigger::{ApiTrigger, Call};

pub type SharedKv = Arc<dyn KvStore>;

/// Long-polling/live endpoints the graceful-shutdown watcher never blocks,
/// even mid-drain.
pub const SHUTDOWN_IGNORE_PATHS: &[&str] = &[
    "/api/info/actualizer/",
    "/api/shell/console",
    "/api/core/livesysstat",
];

/// Ceiling on how much of a request body is buffered to build the trigger
/// call's `Post`/`Stdin` payload. Not present in the original, which reads
/// `r.Body` unbounded; buffering a request this size into memory before a
/// best-effort side channel is its own liability, so this layer caps it.
const MAX_TRIGGER_BODY_BYTES: usize = 1024 * 1024;

/// Flattens a query or form-encoded string into `newAPICall`'s
/// `getQueryParamsMap` shape: repeated keys have their values concatenated
/// rather than collected into a list.
fn parse_flat_params(raw: &str) -> HashMap<String, String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(raw)
        .unwrap_or_default()
        .into_iter()
        .fold(HashMap::new(), |mut acc, (key, value)| {
            acc.entry(key).and_modify(|existing: &mut String| existing.push_str(&value)).or_insert(value);
            acc
        })
}

fn parse_get_params(req: &Request) -> HashMap<String, String> {
    req.uri().query().map(parse_flat_params).unwrap_or_default()
}

fn parse_post_params(content_type: Option<&str>, body: &[u8]) -> HashMap<String, String> {
    if content_type.unwrap_or("").starts_with("application/x-www-form-urlencoded") {
        std::str::from_utf8(body).map(parse_flat_params).unwrap_or_default()
    } else {
        HashMap::new()
    }
}

fn parse_stdin(body: &[u8]) -> serde_json::Value {
    if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(body).unwrap_or(serde_json::Value::Null)
    }
}

pub struct ShmGuard {
    pub sessions: Arc<SessionRegistry>,
    pub brute: Arc<BruteShield>,
    pub rate_limiter: Arc<HandlerRateLimiter>,
    pub live_handlers: Arc<LiveHandlerSet>,
    pub journal: Arc<Journal<SharedKv>>,
    pub templates: Arc<UserTemplateStore<SharedKv>>,
    pub trigger: Arc<ApiTrigger>,
    pub shutdown: ShutdownWatcher,
    pub web_server_name: String,
    pub version: String,
}

impl ShmGuard {
    pub fn from_config(
        config: &shm_config::Config,
        kv: SharedKv,
        trigger_dir: impl Into<std::path::PathBuf>,
    ) -> (crate::shutdown::ShutdownHandle, Self) {
        let (shutdown_handle, shutdown) = ShutdownWatcher::new();
        let guard = Self {
            sessions: Arc::new(SessionRegistry::new(
                config.sessions.session_id_key.clone(),
                config.sessions.session_id_key_length,
                config.sessions.session_life_time,
                config.sessions.strict_ip,
            )),
            brute: Arc::new(BruteShield::new(config.brute.block_attempts, config.brute.ban_time)),
            rate_limiter: Arc::new(HandlerRateLimiter::with_defaults()),
            live_handlers: Arc::new(LiveHandlerSet::new(config.top.max_handlers_for_user)),
            journal: Arc::new(Journal::new(kv.clone(), config.journal.bucket_for_operations.clone())),
            templates: Arc::new(UserTemplateStore::new(kv)),
            trigger: Arc::new(ApiTrigger::new(trigger_dir, crate::trigger::DEFAULT_TRIGGER_TIMEOUT)),
            shutdown,
            web_server_name: config.top.web_server_name.clone(),
            version: config.top.version.clone(),
        };
        (shutdown_handle, guard)
    }

    /// Step 2: headers always set on an admitted response. Applied once the
    /// response is in hand (the handler's own headers do not survive, same
    /// as the original setting them on the shared `ResponseWriter` ahead of
    /// any handler write).
    fn apply_standard_headers(&self, response: &mut Response) {
        let headers = response.headers_mut();
        headers.insert(
            header::SERVER,
            HeaderValue::from_str(&self.web_server_name).unwrap_or_else(|_| HeaderValue::from_static("SHM API server")),
        );
        headers.insert(
            "Version",
            HeaderValue::from_str(&self.version).unwrap_or_else(|_| HeaderValue::from_static("unknown")),
        );
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("post-check=0, pre-check=0, no-store, no-cache, must-revalidate, max-age=0"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("-1"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    fn shutdown_response() -> Response {
        (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response()
    }

    fn plain_429(message: impl Into<String>) -> Response {
        (StatusCode::TOO_MANY_REQUESTS, message.into()).into_response()
    }

    fn plain_401(message: impl Into<String>) -> Response {
        (StatusCode::UNAUTHORIZED, message.into()).into_response()
    }

    fn plain_403(message: impl Into<String>) -> Response {
        (StatusCode::FORBIDDEN, message.into()).into_response()
    }

    fn peer_ip(req: &Request) -> String {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn cookie_value<'a>(req: &'a Request, cookie_name: &str) -> Option<&'a str> {
        req.headers()
            .get(header::COOKIE)?
            .to_str()
            .ok()?
            .split(';')
            .map(|p| p.trim())
            .find_map(|p| p.strip_prefix(&format!("{cookie_name}=")))
    }

    /// The full gate, used by every module-facing handler.
    pub async fn admit(State(guard): State<Arc<ShmGuard>>, req: Request, next: Next) -> Response {
        let path = req.uri().path().to_string();

        // Step 1.
        if guard.shutdown.is_shutting_down() && !SHUTDOWN_IGNORE_PATHS.iter().any(|p| path.starts_with(p)) {
            return Self::shutdown_response();
        }

        let ip = Self::peer_ip(&req);

        // Step 4 (sweep happens inline before every Check, so an expired
        // ban is observed immediately rather than on the next sweeper tick).
        guard.sessions.clean_expired();

        // Step 5.
        let (allowed, ban_remaining) = guard.brute.check(&ip);
        if !allowed {
            tracing::warn!(client_ip = %ip, ban_remaining, "brute shield denied request");
            let mut resp = Self::plain_429(format!("banned for {ban_remaining} more seconds"));
            guard.apply_standard_headers(&mut resp);
            return resp;
        }

        // Step 6.
        let cookie_value = Self::cookie_value(&req, guard.sessions.cookie_name()).map(|s| s.to_string());
        let session = match guard.sessions.get(cookie_value.as_deref(), &ip) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(client_ip = %ip, error = %e, "session lookup failed");
                let mut resp = Self::plain_401(e.to_string());
                guard.apply_standard_headers(&mut resp);
                return resp;
            }
        };

        // Step 7.
        guard.brute.clean(&ip);

        // Step 8.
        if !guard.rate_limiter.check(&path, &session) {
            let mut resp = Self::plain_429(format!("rate limit exceeded for {path}"));
            guard.apply_standard_headers(&mut resp);
            return resp;
        }

        // Step 9.
        let _ = guard.sessions.register_activity(&session.id, &path);

        // Step 10: root bypasses the template lookup entirely; anyone else
        // needs a resolvable template granting the request's module.
        let module = get_current_module(&path).unwrap_or("");
        match guard.templates.has_permission(&session.username, &session.template, module) {
            Ok(true) => {}
            Ok(false) => {
                let mut resp = Self::plain_403(format!("permission denied for module {module}"));
                guard.apply_standard_headers(&mut resp);
                return resp;
            }
            Err(_) => {
                let mut resp = AppError::auth(format!("no template named {}", session.template)).into_response();
                guard.apply_standard_headers(&mut resp);
                return resp;
            }
        }

        // Steps 11-12: CheckCap is folded into Register itself so the two
        // never race under separate lock acquisitions — one write lock
        // covers both the count and the insert.
        let handler_id = match guard
            .live_handlers
            .register(&path, &session.username, &ip, &session.id)
        {
            Ok(id) => id,
            Err(current) => {
                let mut resp = AppError::requests_exceeded(format!(
                    "exceeded the number of simultaneous requests for user ({current})"
                ))
                .into_response();
                guard.apply_standard_headers(&mut resp);
                return resp;
            }
        };
        let _guard = LiveHandlerGuard::new(&guard.live_handlers, handler_id);

        // Step 13: best-effort, must never block the request.
        if let Err(e) = guard.journal.add(
            Operation {
                date: String::new(),
                username: session.username.clone(),
                ip: ip.clone(),
                uri: path.clone(),
                session_id: session.id.clone(),
            },
            chrono::Utc::now(),
        ) {
            tracing::warn!(error = %e, "journal write failed");
        }

        // Step 14: buffer the body once so it both reaches the handler
        // unchanged and survives to build the trigger call's Post/Stdin
        // payload (the original reads `r.Body` once, inside `newAPICall`,
        // before the handler even runs; axum's `Request` body can only be
        // read once, so the buffer has to be taken here and replayed).
        let get_params = parse_get_params(&req);
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let (parts, body) = req.into_parts();
        let body_bytes = to_bytes(body, MAX_TRIGGER_BODY_BYTES).await.unwrap_or_default();
        let post_params = parse_post_params(content_type.as_deref(), &body_bytes);
        let stdin = parse_stdin(&body_bytes);
        let req = Request::from_parts(parts, Body::from(body_bytes));

        let mut response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
            Ok(response) => response,
            Err(_) => {
                tracing::error!(uri = %path, username = %session.username, "handler panicked");
                AppError::Fault("handler panicked".to_string()).into_response()
            }
        };

        guard.apply_standard_headers(&mut response);

        // Step 15: fire-and-forget, never allowed to affect the response
        // already computed above.
        if let Some(trigger_name) = get_current_module(&path) {
            let call = Call::new(&session, get_params, post_params, stdin);
            guard.trigger.call(trigger_name, &call).await;
        }

        response
    }

    /// The reduced gate for the login endpoint (steps 2, 3, 14, 15 only).
    pub async fn admit_login(State(guard): State<Arc<ShmGuard>>, req: Request, next: Next) -> Response {
        if guard.shutdown.is_shutting_down() {
            return Self::shutdown_response();
        }

        let get_params = parse_get_params(&req);
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let (parts, body) = req.into_parts();
        let body_bytes = to_bytes(body, MAX_TRIGGER_BODY_BYTES).await.unwrap_or_default();
        let post_params = parse_post_params(content_type.as_deref(), &body_bytes);
        let stdin = parse_stdin(&body_bytes);
        let req = Request::from_parts(parts, Body::from(body_bytes));

        let mut response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
            Ok(response) => response,
            Err(_) => {
                tracing::error!("login handler panicked");
                AppError::Fault("handler panicked".to_string()).into_response()
            }
        };

        guard.apply_standard_headers(&mut response);
        let call = Call::without_session(get_params, post_params, stdin);
        guard.trigger.call("login", &call).await;
        response
    }
}

pub async fn spawn_background_sweepers(guard: Arc<ShmGuard>, interval: Duration) {
    let sessions = guard.sessions.clone();
    tokio::spawn(crate::session::spawn_expiry_sweeper(sessions, interval));
}
