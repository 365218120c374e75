//! WebSocket transport: one [`Channel`] and one dispatch loop per socket.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use relay_core::{Channel, ChannelStreams};
use relay_protocol::outbound::ProtocolError;
use relay_protocol::Envelope;
use relay_topics as topics;

use crate::AppState;

pub(crate) async fn upgrade(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_connection(state, socket, params))
}

async fn run_connection(state: AppState, socket: WebSocket, params: HashMap<String, String>) {
    let prefix = params
        .get("prefix")
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .unwrap_or(state.stream_prefix())
        .to_string();
    let params_json = serde_json::to_value(&params).unwrap_or(Value::Null);
    let gauge = state.connections().clone();
    let (channel, streams) = Channel::subscribe(
        state.hub(),
        &prefix,
        params.get("page_id").map(String::as_str),
        &params_json,
        &*gauge,
    );

    let (sink, mut inbound) = socket.split();
    let writer = tokio::spawn(forward_outbound(sink, streams));

    while let Some(frame) = inbound.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    reject(&channel, "", "binary frame is not UTF-8");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(channel = %channel.id(), %err, "socket read failed");
                break;
            }
        };
        dispatch_frame(&state, &channel, &text).await;
    }

    channel.unsubscribe(state.registry(), &*gauge);
    writer.abort();
}

/// Decodes one text frame and runs it through the bus on the blocking pool.
/// Awaiting the dispatch keeps frames from one socket in order.
pub(crate) async fn dispatch_frame(state: &AppState, channel: &Arc<Channel>, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(err) => {
            reject(channel, "", format!("frame is not an event envelope: {err}"));
            return;
        }
    };
    let bus = state.bus();
    let ch = Arc::clone(channel);
    match tokio::task::spawn_blocking(move || ch.receive(&bus, envelope)).await {
        Ok(Ok(report)) => {
            if !report.is_clean() {
                debug!(
                    channel = %channel.id(),
                    failures = report.failures.len(),
                    "dispatch finished with handler failures"
                );
            }
        }
        Ok(Err(decode)) => {
            warn!(channel = %channel.id(), event = %decode.event, error = %decode, "inbound decode failed");
            let event = decode.event.clone();
            reject(channel, &event, decode.to_string());
        }
        Err(join) => warn!(channel = %channel.id(), %join, "dispatch task failed"),
    }
}

fn reject(channel: &Channel, event: &str, detail: impl Into<String>) {
    channel.emit_to_client(
        topics::EVENT_PROTOCOL_ERROR,
        &ProtocolError {
            event: event.to_string(),
            detail: detail.into(),
        },
    );
}

async fn forward_outbound<S>(mut sink: S, streams: ChannelStreams)
where
    S: futures_util::Sink<Message> + Unpin,
{
    let ChannelStreams {
        mut direct,
        broadcast: mut fanout,
    } = streams;
    loop {
        let next = tokio::select! {
            env = direct.recv() => env,
            env = fanout.recv() => env,
        };
        let envelope = match next {
            Ok(env) => env,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "outbound stream lagged; dropping envelopes");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(err) => {
                warn!(event = %envelope.event, %err, "outbound envelope not serializable");
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::build_state;
    use relay_core::{Config, NoHooks};
    use serde_json::json;

    #[tokio::test]
    async fn frames_dispatch_in_order_and_bad_frames_get_protocol_errors() {
        let state = build_state(&Config::default()).expect("state");
        let (channel, mut streams) =
            Channel::subscribe(state.hub(), "forms", Some("p"), &json!({}), &NoHooks);

        dispatch_frame(&state, &channel, "not json").await;
        dispatch_frame(&state, &channel, r#"{"event":"chat","data":{"role":"user"}}"#).await;
        dispatch_frame(
            &state,
            &channel,
            r#"{"event":"form:poll","data":{"fields":{"a":{"value":"x"}}}}"#,
        )
        .await;
        dispatch_frame(&state, &channel, r#"{"event":"presence:ping"}"#).await;

        let got = streams.drain();
        let names: Vec<_> = got.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["protocol:error", "protocol:error", "form:stats"]);
        assert_eq!(got[0].data["event"], json!(""));
        assert_eq!(got[1].data["event"], json!("chat"));
        assert_eq!(got[2].data, json!({"filled": 1, "total": 1}));
    }
}
