//! Admission, session, and brute-force hardening layer for the SHM control
//! panel API: a [`tower`]/[`axum`] middleware stack that gates every
//! incoming request through session validation, brute-force shielding,
//! per-handler rate limiting, permission checks, and a concurrency cap,
//! then journals the call and fires any registered trigger.

pub mod brute;
pub mod error;
pub mod journal;
pub mod kv;
pub mod live_handlers;
pub mod module_path;
pub mod pipeline;
pub mod rate_limit;
pub mod session;
pub mod shutdown;
pub mod template;
pub mod trigger;

pub use error::{AppError, ErrorCode};
pub use pipeline::{ShmGuard, SharedKv};
pub use session::{Session, SessionRegistry};
