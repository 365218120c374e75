use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use relay_core::{
    load_config, Config, ConfiguredModel, ConversationLog, CorrelationRegistry, FormBus,
    MemoryStore, ServerConfig, StorageBackend, TurnStore,
};
use relay_events::StreamHub;
use relay_forms::{FormAssistant, FormsSettings};
use relay_kernel::SqliteStore;

use crate::access_log;
use crate::tasks::{self, TaskManager};
use crate::AppState;

const DEFAULT_BIND: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8095;
const DEFAULT_MAX_CONC: usize = 1024;
const STREAM_CAPACITY: usize = 256;

pub(crate) struct BootstrapOutput {
    pub router: axum::Router<()>,
    pub state: AppState,
    pub background_tasks: TaskManager,
}

/// Reads the file named by `RELAY_CONFIG` (defaults when unset) and applies
/// the `RELAY_MODEL` override.
pub(crate) fn config_from_env() -> Result<Config> {
    let mut cfg = match std::env::var("RELAY_CONFIG") {
        Ok(path) if !path.trim().is_empty() => load_config(path.trim())?,
        _ => Config::default(),
    };
    if let Ok(model) = std::env::var("RELAY_MODEL") {
        cfg.model.id = Some(model);
    }
    Ok(cfg)
}

/// Wires stores, the registry and the bus, and installs the form handlers.
pub(crate) fn build_state(cfg: &Config) -> Result<AppState> {
    let (log, turns): (Arc<dyn ConversationLog>, Arc<dyn TurnStore>) =
        match cfg.storage.backend() {
            StorageBackend::Memory => {
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            }
            StorageBackend::Sqlite => {
                let store = Arc::new(SqliteStore::open(&cfg.storage.state_dir())?);
                (store.clone(), store)
            }
        };
    let registry = Arc::new(CorrelationRegistry::new());
    let model = cfg.model.handle();
    match &model {
        Some(m) => info!(model = %m.id, "inference model configured"),
        None => info!("no inference model configured; llm requests disabled"),
    }
    let assistant = Arc::new(FormAssistant::new(
        log.clone(),
        turns,
        registry.clone(),
        Arc::new(ConfiguredModel::new(model)),
        FormsSettings::from(&cfg.forms),
    ));
    let bus = Arc::new(FormBus::new());
    let ids = assistant.install(&bus);
    info!(handlers = ids.len(), backend = ?cfg.storage.backend(), "form handlers installed");
    Ok(AppState::new(
        bus,
        StreamHub::new(STREAM_CAPACITY),
        registry,
        log,
        cfg.forms.stream_prefix(),
    ))
}

pub(crate) fn build(cfg: &Config) -> Result<BootstrapOutput> {
    let state = build_state(cfg)?;
    let mut background_tasks = TaskManager::new();
    background_tasks.push(tasks::spawn_correlation_sweeper(
        state.registry().clone(),
        state.hub().clone(),
        cfg.correlation.pending_ttl(),
        cfg.correlation.sweep_interval(),
    ));
    let router = crate::router::build(state.clone());
    Ok(BootstrapOutput {
        router,
        state,
        background_tasks,
    })
}

pub(crate) fn attach_http_layers(
    router: axum::Router<()>,
    concurrency_limit: usize,
) -> axum::Router<()> {
    use tower::limit::ConcurrencyLimitLayer;
    use tower_http::trace::TraceLayer;

    router
        .layer(axum::middleware::from_fn_with_state(
            access_log::AccessCfg::from_env(),
            access_log::access_log_mw,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpConfigError {
    #[error("invalid RELAY_HTTP_MAX_CONC: {0}")]
    InvalidConcurrency(String),
    #[error("invalid RELAY_PORT: {0}")]
    InvalidPort(String),
    #[error("invalid RELAY_BIND: {0}")]
    InvalidBind(String),
}

#[derive(Debug)]
pub(crate) struct HttpConfig {
    pub addr: std::net::SocketAddr,
    pub concurrency_limit: usize,
}

/// Environment wins over the `[server]` section, which wins over defaults.
pub(crate) fn http_config_from_env(server: &ServerConfig) -> Result<HttpConfig, HttpConfigError> {
    let concurrency_limit = match std::env::var("RELAY_HTTP_MAX_CONC") {
        Ok(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(HttpConfigError::InvalidConcurrency(raw))?,
        Err(_) => server.max_connections.unwrap_or(DEFAULT_MAX_CONC).max(1),
    };

    let bind = std::env::var("RELAY_BIND")
        .ok()
        .or_else(|| server.bind.clone())
        .unwrap_or_else(|| DEFAULT_BIND.into());
    let port = match std::env::var("RELAY_PORT") {
        Ok(raw) => raw
            .parse::<u16>()
            .map_err(|_| HttpConfigError::InvalidPort(raw))?,
        Err(_) => server.port.unwrap_or(DEFAULT_PORT),
    };

    let addr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|_| HttpConfigError::InvalidBind(bind.clone()))?;

    Ok(HttpConfig {
        addr,
        concurrency_limit,
    })
}
