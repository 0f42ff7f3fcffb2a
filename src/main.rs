use std::{collections::HashMap, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

mod analyzer;
mod api;
mod audit;
mod backends;
mod budget;
mod classifier;
mod config;
mod engine;
mod error;
mod models;
mod policy;
mod risk;
mod traffic;
mod types;
mod virtual_models;

pub use config::Config;
pub use error::RoutingGatewayError;
pub use traffic::TrafficLog;

use crate::{backends::BackendClient, config::Provider, engine::RouterState, models::ModelCatalog, policy::PolicyEngine, virtual_models::VirtualModelRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /healthz and exit immediately.
    // This avoids needing any external tool (curl/wget) in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "routing_gateway=info,tower_http=warn".into()),
        )
        .init();

    // Load config
    let config_path = std::env::var("ROUTING_GATEWAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/routing-gateway/config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!(
        client_port = config.gateway.client_port,
        admin_port = config.gateway.admin_port,
        "routing-gateway starting"
    );

    let policy = PolicyEngine::load(std::path::Path::new(&config.gateway.policies_dir))
        .context("loading routing policies")?;
    let virtual_models = VirtualModelRegistry::load(std::path::Path::new(&config.gateway.models_config_path))
        .context("loading virtual model catalog")?;
    let model_catalog = ModelCatalog::load(std::path::Path::new(&config.gateway.models_config_path))
        .context("loading model pricing catalog")?;

    let mut backends: HashMap<Provider, Arc<BackendClient>> = HashMap::new();
    for (name, backend_cfg) in &config.backends {
        match BackendClient::new(backend_cfg) {
            Ok(client) => {
                info!(backend = %name, provider = %backend_cfg.provider, "backend initialized");
                backends.insert(backend_cfg.provider, Arc::new(client));
            }
            Err(e) => {
                warn!(backend = %name, error = %e, "failed to initialize backend — it will be unavailable for dispatch");
            }
        }
    }

    let budget = Arc::new(budget::BudgetTracker::new(config.gateway.redis_url.as_deref()).await);
    let audit = Arc::new(audit::AuditLogger::open(&config.gateway.audit_log_path).await
        .with_context(|| format!("opening audit log at {}", config.gateway.audit_log_path))?);

    let traffic_log = Arc::new(TrafficLog::new(config.gateway.traffic_log_capacity));
    let config = Arc::new(config);

    // Build router state
    let state = Arc::new(RouterState::new(
        Arc::clone(&config),
        config_path.clone(),
        Arc::new(policy),
        Arc::new(virtual_models),
        Arc::new(model_catalog),
        backends,
        budget,
        audit,
        Arc::clone(&traffic_log),
    ));

    // Spawn hot-reload watcher — polls the config file every 5 seconds
    tokio::spawn(config_watcher(Arc::clone(&state)));

    // Bind client API (agent-facing)
    let client_addr: SocketAddr = format!("0.0.0.0:{}", config.gateway.client_port).parse()?;

    // Bind admin API
    let admin_addr: SocketAddr = format!("0.0.0.0:{}", config.gateway.admin_port).parse()?;

    info!(%client_addr, "client API listening");
    info!(%admin_addr, "admin API listening");

    let client_listener = tokio::net::TcpListener::bind(client_addr).await?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr).await?;

    // Attach request tracing middleware to both servers
    let trace_layer = || {
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO))
    };

    let client_app = api::client::router(Arc::clone(&state))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            api::client_auth::client_auth_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            api::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer());
    let admin_app = api::admin::router(Arc::clone(&state))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            api::admin_auth::admin_auth_middleware,
        ))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer());

    tokio::select! {
        result = axum::serve(client_listener, client_app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result.context("client API server error")?;
        }
        result = axum::serve(admin_listener, admin_app) => {
            result.context("admin API server error")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Lightweight healthcheck: GET /healthz and exit 0 on 200, 1 otherwise.
/// Invoked via `routing-gateway --healthcheck` from Docker HEALTHCHECK.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("ROUTING_GATEWAY_CLIENT_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(8080);

    let url = format!("http://127.0.0.1:{port}/healthz");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}

/// Background task: polls the config file every 5 seconds and hot-reloads on change.
///
/// Uses filesystem `mtime` for change detection — no inotify/kqueue dependencies.
/// Parse failures are logged and ignored; the running config is unchanged.
///
/// Reloading the gateway config also re-reads the routing policy directory
/// and virtual model catalog, since both are referenced by path from it —
/// each is built off-path and atomically swapped independently so in-flight
/// requests always finish against a consistent snapshot of whichever one
/// they started with.
async fn config_watcher(state: Arc<RouterState>) {
    let path = &state.config_path;

    let mut last_mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();

    // Initial tick fires immediately; skip it so we don't reload on startup.
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.tick().await;

    loop {
        interval.tick().await;

        let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        if mtime == last_mtime {
            continue;
        }

        match Config::load(path) {
            Ok(new_cfg) => {
                let policies_dir = new_cfg.gateway.policies_dir.clone();
                let models_path = new_cfg.gateway.models_config_path.clone();

                match PolicyEngine::load(std::path::Path::new(&policies_dir)) {
                    Ok(new_policy) => state.reload_policy(Arc::new(new_policy)),
                    Err(e) => warn!(dir = %policies_dir, error = %e, "policy reload failed during config hot-reload — keeping previous policies"),
                }
                match VirtualModelRegistry::load(std::path::Path::new(&models_path)) {
                    Ok(new_vms) => state.reload_virtual_models(Arc::new(new_vms)),
                    Err(e) => warn!(path = %models_path, error = %e, "virtual model reload failed during config hot-reload — keeping previous catalog"),
                }
                match ModelCatalog::load(std::path::Path::new(&models_path)) {
                    Ok(new_catalog) => state.reload_model_catalog(Arc::new(new_catalog)),
                    Err(e) => warn!(path = %models_path, error = %e, "model pricing reload failed during config hot-reload — keeping previous catalog"),
                }

                state.replace_config(Arc::new(new_cfg));
                info!(path = %path.display(), "config hot-reloaded");
                last_mtime = mtime;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config reload failed — keeping previous config");
            }
        }
    }
}
