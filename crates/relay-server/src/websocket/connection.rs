//! WebSocket connection lifecycle: one connected client from upgrade through
//! disconnect.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use relay_bus::{SessionConnected, SessionDisconnected};
use relay_core::ConnectionId;
use tracing::{debug, info, instrument, warn};

use super::socket::{OutboundFrame, channel_socket};
use crate::frames::{
    ChannelJoined, ChannelLeft, ConnectionEstablished, ErrorFrame, InboundFrame, types,
};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
    WS_FRAMES_INVALID_TOTAL, WS_FRAMES_RATE_LIMITED_TOTAL,
};
use crate::server::AppState;

/// Source recorded on bus events the connection layer emits.
const SOURCE: &str = "gateway";

/// Run a WebSocket connection for one client.
///
/// 1. Registers a session and sends `connection:established`
/// 2. Forwards queued outbound frames, with periodic Ping frames
/// 3. Touches, rate limits, and routes every inbound text frame
/// 4. Removes the session when either side closes
#[instrument(skip_all, fields(connection_id = %connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection_id: ConnectionId,
    user_id: Option<String>,
    state: AppState,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (socket, mut outbound) =
        channel_socket(connection_id.clone(), state.settings.outbound_queue_size);

    let info = state.sessions.create(socket, user_id.clone());
    let session_id = info.id;
    let started = std::time::Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    info!(session_id = %session_id, "client connected");

    let _ = state.sessions.send(
        &session_id,
        types::CONNECTION_ESTABLISHED,
        &ConnectionEstablished {
            session_id: &session_id,
        },
    );
    let _ = state.bus.emit_typed(
        SOURCE,
        &SessionConnected {
            session_id: session_id.to_string(),
            user_id,
        },
    );

    // Outbound forwarder with periodic Ping frames.
    let heartbeat = Duration::from_millis(state.settings.heartbeat_interval_ms.max(1));
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = outbound.next() => match frame {
                    Some(OutboundFrame::Text(text)) => {
                        if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundFrame::Close { code, reason }) => {
                        let frame = CloseFrame { code, reason: reason.into() };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    None => break,
                },
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = &mut writer => {
                debug!(session_id = %session_id, "writer finished");
                break;
            }
        };
        let text = match msg {
            Some(Ok(Message::Text(t))) => t.to_string(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "received non-UTF8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                let _ = state.sessions.touch(&session_id);
                continue;
            }
            Some(Ok(Message::Close(_))) => {
                debug!(session_id = %session_id, "client sent close frame");
                break;
            }
            Some(Err(e)) => {
                warn!(session_id = %session_id, error = %e, "websocket read failed");
                break;
            }
            None => break,
        };

        handle_text_frame(&state, &session_id, &text);
    }

    // Clean up
    let removed = state.sessions.remove_by_socket(&connection_id);
    let reason = if removed { "closed" } else { "removed by server" };
    let _ = state.bus.emit_typed(
        SOURCE,
        &SessionDisconnected {
            session_id: session_id.to_string(),
            reason: reason.to_owned(),
        },
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    info!(session_id = %session_id, reason, "client disconnected");
    writer.abort();
}

/// Apply one inbound text frame from `session_id`.
///
/// Every frame counts as activity. Frames past the rate limit are dropped
/// silently; unparseable frames are answered with an `error` frame.
pub fn handle_text_frame(state: &AppState, session_id: &str, text: &str) {
    let _ = state.sessions.touch(session_id);
    if !state.sessions.consume_rate_limit(session_id) {
        counter!(WS_FRAMES_RATE_LIMITED_TOTAL).increment(1);
        debug!(session_id, "rate limited, frame dropped");
        return;
    }

    let frame = match InboundFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            counter!(WS_FRAMES_INVALID_TOTAL).increment(1);
            debug!(session_id, error = %e, "invalid inbound frame");
            let message = format!("Invalid message: {e}");
            let _ = state
                .sessions
                .send(session_id, types::ERROR, &ErrorFrame { message: &message });
            return;
        }
    };
    debug!(session_id, kind = frame.kind(), "inbound frame");

    match frame {
        InboundFrame::Subscribe { pattern } => {
            let _ = state.bridge.subscribe(session_id, &pattern);
        }
        InboundFrame::Unsubscribe { pattern } => {
            let _ = state.bridge.unsubscribe(session_id, &pattern);
        }
        InboundFrame::Publish { event_type, data } => {
            let _ = state.bridge.publish(session_id, &event_type, data);
        }
        InboundFrame::ChannelJoin { channel } => {
            let success = state.sessions.subscribe_to_channel(session_id, &channel);
            let _ = state.sessions.send(
                session_id,
                types::CHANNEL_JOINED,
                &ChannelJoined {
                    channel: &channel,
                    success,
                },
            );
        }
        InboundFrame::ChannelLeave { channel } => {
            let _ = state.sessions.unsubscribe_from_channel(session_id, &channel);
            let _ = state
                .sessions
                .send(session_id, types::CHANNEL_LEFT, &ChannelLeft { channel: &channel });
        }
        InboundFrame::MetadataSet { key, value } => {
            let _ = state.sessions.set_metadata(session_id, &key, &value);
        }
    }
}
