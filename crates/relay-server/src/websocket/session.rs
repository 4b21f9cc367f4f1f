//! WebSocket connection lifecycle, from upgrade through disconnect.
//!
//! Each socket runs as a small task group:
//!
//! - the writer drains the outbound queue, pings, and sends the close frame
//! - the silence watcher closes a socket that stopped talking
//! - the forwarder (after the handshake) routes session channel events
//! - the reader, this task, handles the handshake and inbound frames
//!
//! All of them stop when the connection's close token fires. The first
//! close reason recorded is what the client sees in the close frame.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_core::{
    ClientFrame, CloseReason, ConnectionId, HandshakeError, Hello, Payload, Role, ServerFrame, SessionId,
};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{Span, debug, field, info, instrument, warn};

use super::connection::ClientConnection;
use super::silence::{SilencePolicy, watch_silence};
use crate::bus::Subscription;
use crate::metrics::{
    HANDSHAKE_FAILURES_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_DROPPED_FRAMES_TOTAL,
};
use crate::relay::RelayContext;
use crate::relay::gateway::JoinedSession;
use crate::relay::router::{Delivery, route};

/// How long the writer gets to flush and send the close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run one accepted WebSocket until it closes.
#[instrument(skip_all, fields(conn_id = %conn_id, session_id = field::Empty, role = field::Empty))]
pub async fn run_ws_session(ws: WebSocket, conn_id: ConnectionId, ctx: Arc<RelayContext>) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<String>(ctx.config.outbound_queue.max(1));
    let conn = Arc::new(ClientConnection::new(conn_id, send_tx));

    ctx.hub.add(conn.clone());
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    debug!("connection accepted");

    let writer = tokio::spawn(write_loop(ws_tx, send_rx, conn.clone(), ctx.config.ping_interval));
    let silence = tokio::spawn(watch_silence(
        conn.clone(),
        SilencePolicy::new(ctx.config.ping_interval, ctx.config.pong_timeout),
    ));

    match handshake(&mut ws_rx, &conn, &ctx).await {
        Ok(Some(joined)) => serve_joined(&mut ws_rx, &conn, &ctx, joined).await,
        Ok(None) => debug!("client left before handshake"),
        Err(err) => {
            info!(error = %err, "handshake rejected");
            counter!(HANDSHAKE_FAILURES_TOTAL, "reason" => err.label()).increment(1);
            let _ = conn.close(err.close_reason());
        }
    }

    let _ = conn.close(CloseReason::Normal);
    silence.abort();
    ctx.gateway.leave(&conn).await;
    if time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        warn!("writer did not finish, dropping socket");
    }

    let reason = conn.close_reason().unwrap_or(CloseReason::Normal);
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());
    info!(reason = reason.as_str(), dropped = conn.drop_count(), "connection closed");
}

/// Wait for the `hello` frame and admit the connection, all within the
/// handshake timeout.
///
/// `Ok(None)` means the client went away (or the server is closing the
/// connection) before saying anything useful.
async fn handshake(
    ws_rx: &mut SplitStream<WebSocket>,
    conn: &Arc<ClientConnection>,
    ctx: &RelayContext,
) -> Result<Option<JoinedSession>, HandshakeError> {
    let admit = async {
        match read_hello(ws_rx, conn).await {
            None => Ok(None),
            Some(hello) => ctx.gateway.join(conn, hello?).await.map(Some),
        }
    };
    tokio::select! {
        biased;
        () = conn.closed() => Ok(None),
        admitted = time::timeout(ctx.config.handshake_timeout, admit) => {
            admitted.unwrap_or(Err(HandshakeError::Timeout))
        }
    }
}

async fn read_hello(
    ws_rx: &mut SplitStream<WebSocket>,
    conn: &ClientConnection,
) -> Option<Result<Hello, HandshakeError>> {
    while let Some(Ok(msg)) = ws_rx.next().await {
        conn.mark_alive();
        match msg {
            Message::Text(text) => return Some(Hello::parse(text.as_str())),
            Message::Binary(_) => return Some(Err(HandshakeError::NotHello)),
            Message::Close(_) => return None,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    None
}

async fn serve_joined(
    ws_rx: &mut SplitStream<WebSocket>,
    conn: &Arc<ClientConnection>,
    ctx: &RelayContext,
    joined: JoinedSession,
) {
    let JoinedSession {
        session_id,
        role,
        subscription,
        peer,
    } = joined;
    let span = Span::current();
    let _ = span.record("session_id", field::display(&session_id));
    let _ = span.record("role", role.as_str());

    let _ = conn.send_frame(&ServerFrame::HelloAck {
        session_id: session_id.clone(),
    });
    if peer.is_some() {
        let _ = conn.send_frame(&ServerFrame::PeerJoined { role: role.opposite() });
    }

    let forwarder = tokio::spawn(forward(subscription, conn.clone(), session_id.clone(), role, peer));
    read_loop(ws_rx, conn, ctx, &session_id, role).await;
    forwarder.abort();
}

/// Route session channel events to this connection. `greeted_peer` was
/// already announced to the client at join and is not announced again.
async fn forward(
    mut subscription: Subscription,
    conn: Arc<ClientConnection>,
    session_id: SessionId,
    role: Role,
    greeted_peer: Option<ConnectionId>,
) {
    loop {
        let raw = tokio::select! {
            biased;
            () = conn.closed() => return,
            next = subscription.next() => next,
        };
        let Some(raw) = raw else {
            warn!(session_id = %session_id, "session channel closed");
            let _ = conn.close(CloseReason::Unavailable);
            return;
        };
        match route(&raw, &session_id, role, &conn.id, greeted_peer.as_ref()) {
            Delivery::Forward(text) => {
                if !conn.send(text) && !conn.is_closing() {
                    counter!(WS_DROPPED_FRAMES_TOTAL).increment(1);
                    debug!(session_id = %session_id, "outbound queue full, frame dropped");
                }
            }
            Delivery::Drop => {}
            Delivery::Evict => {
                info!(session_id = %session_id, %role, "superseded by a newer connection");
                let _ = conn.close(CloseReason::Superseded);
                return;
            }
            Delivery::Kill => {
                let _ = conn.terminate(CloseReason::SessionKilled, Some(&ServerFrame::SessionKilled));
                return;
            }
        }
    }
}

async fn read_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    conn: &ClientConnection,
    ctx: &RelayContext,
    session_id: &SessionId,
    role: Role,
) {
    loop {
        let msg = tokio::select! {
            biased;
            () = conn.closed() => return,
            msg = ws_rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "transport error");
                return;
            }
            None => return,
        };
        conn.mark_alive();

        match msg {
            Message::Text(text) => match ClientFrame::classify(text.as_str()) {
                ClientFrame::Heartbeat => {
                    if let Err(e) = ctx.liveness.heartbeat(session_id).await {
                        debug!(error = %e, "heartbeat touch failed");
                    }
                    let _ = conn.send_frame(&ServerFrame::HbAck);
                }
                ClientFrame::Hello => debug!("ignoring repeated hello"),
                ClientFrame::Payload => relay(ctx, session_id, role, Payload::Text(text.as_str().to_owned())).await,
            },
            Message::Binary(data) => relay(ctx, session_id, role, Payload::Binary(data.to_vec())).await,
            Message::Close(_) => {
                let _ = conn.close(CloseReason::Normal);
                return;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

async fn relay(ctx: &RelayContext, session_id: &SessionId, role: Role, payload: Payload) {
    // failures are logged by the router; the connection stays open
    if ctx.router.publish(session_id, role, payload).await.is_ok() {
        if let Err(e) = ctx.liveness.touch(session_id).await {
            debug!(error = %e, "touch after relay failed");
        }
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    conn: Arc<ClientConnection>,
    ping_interval: Duration,
) {
    let mut ping = time::interval(ping_interval);
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    let _ = conn.close(CloseReason::Normal);
                    return;
                }
            }
            () = conn.closed() => break,
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    let _ = conn.close(CloseReason::Normal);
                    return;
                }
            }
        }
    }

    // flush what was queued, then the farewell notice (e.g. session-killed)
    while let Ok(text) = rx.try_recv() {
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
    if let Some(text) = conn.take_farewell() {
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
    let reason = conn.close_reason().unwrap_or(CloseReason::Normal);
    let frame = CloseFrame {
        code: reason.code(),
        reason: Utf8Bytes::from_static(reason.as_str()),
    };
    let _ = ws_tx.send(Message::Close(Some(frame))).await;
    let _ = ws_tx.close().await;
}
