// Minimal SHM API server wiring the admission pipeline into axum routes.
// Demonstrates the intended composition; a real deployment would add the
// actual module handlers behind the same middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use shm_guard::kv::SledStore;
use shm_guard::pipeline::ShmGuard;

#[derive(Parser, Debug)]
#[command(name = "shm-guard-demo")]
struct Args {
    #[arg(long, env = "SHM_CONFIG_PATH")]
    config: Option<std::path::PathBuf>,

    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    #[arg(long, default_value = "./triggers")]
    trigger_dir: std::path::PathBuf,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn login() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn list_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"items": []}))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = shm_config::load_config(args.config.clone())?;
    tracing::info!(version = %config.top.version, "starting {}", config.top.web_server_name);

    let kv = Arc::new(SledStore::open(&config.journal.path)?) as shm_guard::SharedKv;
    let (_shutdown_handle, guard) = ShmGuard::from_config(&config, kv, args.trigger_dir);
    guard.trigger.scan().ok();
    let guard = Arc::new(guard);

    shm_guard::pipeline::spawn_background_sweepers(guard.clone(), std::time::Duration::from_secs(60)).await;

    let protected = Router::new()
        .route("/api/:module/list", get(list_handler))
        .route_layer(middleware::from_fn_with_state(guard.clone(), ShmGuard::admit));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/login",
            post(login).route_layer(middleware::from_fn_with_state(guard.clone(), ShmGuard::admit_login)),
        )
        .merge(protected);

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!(addr = %args.listen, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shm_guard::shutdown::listen_for_termination())
    .await?;

    Ok(())
}
