use std::time::Duration;
use tracing::{error, info};

mod access_log;
mod app_state;
mod bootstrap;
mod responses;
mod router;
mod tasks;
#[cfg(test)]
mod test_support;
mod ws;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    relay_otel::init();

    let cfg = match bootstrap::config_from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(2);
        }
    };
    let http_cfg = match bootstrap::http_config_from_env(&cfg.server) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    let bootstrap::BootstrapOutput {
        router,
        state,
        background_tasks,
    } = match bootstrap::build(&cfg) {
        Ok(out) => out,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(2);
        }
    };

    let app = bootstrap::attach_http_layers(router, http_cfg.concurrency_limit);

    let listener = match tokio::net::TcpListener::bind(http_cfg.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("error: bind {}: {err}", http_cfg.addr);
            std::process::exit(2);
        }
    };
    info!(
        addr = %http_cfg.addr,
        prefix = state.stream_prefix(),
        tasks = background_tasks.len(),
        "relay listening"
    );

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }

    info!(pending = state.registry().len(), "shutting down background tasks");
    background_tasks
        .shutdown_with_grace(Duration::from_secs(5))
        .await;
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!(%err, "SIGTERM handler unavailable; waiting for ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}
