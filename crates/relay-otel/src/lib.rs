//! Process-wide tracing setup for relay binaries.

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Target the HTTP layer logs completed requests under.
pub const ACCESS_TARGET: &str = "http.access";

static ACCESS_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

/// Rolling access-log file settings, enabled by `RELAY_ACCESS_LOG_ROLL=1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLog {
    pub dir: String,
    pub prefix: String,
    pub rotation: Rotation,
}

impl AccessLog {
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Option<Self> {
        if get("RELAY_ACCESS_LOG_ROLL").as_deref() != Some("1") {
            return None;
        }
        let dir = get("RELAY_ACCESS_LOG_DIR")
            .or_else(|| get("RELAY_LOGS_DIR"))
            .unwrap_or_else(|| "logs".to_string());
        let prefix = get("RELAY_ACCESS_LOG_PREFIX").unwrap_or_else(|| "http-access".into());
        let rotation = match get("RELAY_ACCESS_LOG_ROTATION")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        };
        Some(Self {
            dir,
            prefix,
            rotation,
        })
    }
}

/// Installs the global subscriber. `RUST_LOG` filters console output
/// (default `info`). Safe to call more than once; later calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(fmt::layer().with_filter(filter));
    let Some(access) = AccessLog::from_env() else {
        let _ = registry.try_init();
        return;
    };
    if std::fs::create_dir_all(&access.dir).is_err() {
        tracing::warn!(directory = %access.dir, "failed to create access log directory");
    }
    let writer = match access.rotation {
        Rotation::Hourly => tracing_appender::rolling::hourly(&access.dir, &access.prefix),
        Rotation::Minutely => tracing_appender::rolling::minutely(&access.dir, &access.prefix),
        Rotation::Daily => tracing_appender::rolling::daily(&access.dir, &access.prefix),
    };
    let (nb, guard) = tracing_appender::non_blocking(writer);
    let _ = ACCESS_GUARD.set(guard);
    let targets = Targets::new().with_target(ACCESS_TARGET, tracing::Level::INFO);
    let access_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(nb)
        .with_filter(targets);
    let _ = registry.with(access_layer).try_init();
}
