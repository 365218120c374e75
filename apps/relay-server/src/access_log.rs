use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, State};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::{json, Value};

/// Access-log settings. Records are only written when the rolling access log
/// is switched on, since nothing else listens on the access target.
#[derive(Clone, Debug)]
pub(crate) struct AccessCfg {
    enabled: bool,
    sample_n: u64,
    trust_forward: bool,
    counter: Arc<AtomicU64>,
}

impl AccessCfg {
    pub(crate) fn from_env() -> Self {
        let flag = |key: &str| std::env::var(key).ok().as_deref() == Some("1");
        Self::new(
            relay_otel::AccessLog::from_env().is_some(),
            std::env::var("RELAY_ACCESS_SAMPLE_N")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            flag("RELAY_TRUST_FORWARD_HEADERS"),
        )
    }

    pub(crate) fn new(enabled: bool, sample_n: u64, trust_forward: bool) -> Self {
        Self {
            enabled,
            sample_n: sample_n.max(1),
            trust_forward,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    fn sampled(&self) -> bool {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.sample_n == 1 || n % self.sample_n == 0
    }
}

fn first_forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(v) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        let ip = v.split(',').next().unwrap_or("").trim();
        if !ip.is_empty() {
            return Some(ip.to_string());
        }
    }
    let forwarded = headers.get("forwarded").and_then(|h| h.to_str().ok())?;
    forwarded
        .split(';')
        .flat_map(|s| s.split(','))
        .find_map(|part| part.trim().strip_prefix("for="))
        .map(|ip| ip.trim_matches('"').to_string())
}

fn record(method: &str, path: &str, status: u16, dur_ms: u64, remote: Option<String>) -> Value {
    let mut obj = json!({
        "ts": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "method": method,
        "path": path,
        "status": status,
        "dur_ms": dur_ms,
    });
    if let Some(ip) = remote {
        obj["remote"] = Value::String(ip);
    }
    obj
}

/// Writes one JSON line per completed request under the access target.
pub(crate) async fn access_log_mw(
    State(cfg): State<AccessCfg>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !cfg.enabled {
        return next.run(req).await;
    }
    let started = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let remote = {
        let peer = || {
            req.extensions()
                .get::<axum::extract::ConnectInfo<SocketAddr>>()
                .map(|c| c.0.ip().to_string())
        };
        if cfg.trust_forward {
            first_forwarded_ip(req.headers()).or_else(peer)
        } else {
            peer()
        }
    };
    let res = next.run(req).await;
    if !cfg.sampled() {
        return res;
    }
    let line = record(
        method.as_str(),
        &path,
        res.status().as_u16(),
        started.elapsed().as_millis() as u64,
        remote,
    );
    tracing::info!(target: relay_otel::ACCESS_TARGET, "{line}");
    res
}
