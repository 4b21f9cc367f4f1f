//! Per-connection state shared between a socket's reader, writer, and the
//! session's forwarder.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_core::{CloseReason, ConnectionId, Role, ServerFrame, SessionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One accepted WebSocket.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Session and role, set once the handshake succeeds.
    binding: Mutex<Option<(SessionId, Role)>>,
    /// Outbound queue drained by the writer task.
    tx: mpsc::Sender<String>,
    /// When this connection was accepted.
    pub connected_at: Instant,
    /// Whether anything arrived since the last liveness check.
    pub is_alive: AtomicBool,
    /// When the last frame of any kind arrived.
    last_seen: Mutex<Instant>,
    /// Outbound frames dropped because the queue was full.
    pub dropped_messages: AtomicU64,
    close_reason: Mutex<Option<CloseReason>>,
    /// Last text frame, written after the queue drains and before the close
    /// frame. Never competes for queue space.
    farewell: Mutex<Option<String>>,
    closing: CancellationToken,
}

impl ClientConnection {
    /// Create a connection feeding `tx`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            binding: Mutex::new(None),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            close_reason: Mutex::new(None),
            farewell: Mutex::new(None),
            closing: CancellationToken::new(),
        }
    }

    /// Queue a text frame for the client.
    ///
    /// Returns `false` if the connection is closing or the queue is full or
    /// closed. A full queue counts as a dropped message.
    pub fn send(&self, message: String) -> bool {
        if self.closing.is_cancelled() {
            return false;
        }
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue a server frame.
    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.send(json),
            Err(_) => false,
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Bind this connection to a session and role.
    pub fn bind(&self, session_id: SessionId, role: Role) {
        *self.binding.lock() = Some((session_id, role));
    }

    /// The bound session and role, if the handshake completed.
    pub fn binding(&self) -> Option<(SessionId, Role)> {
        self.binding.lock().clone()
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if anything arrived since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound frame.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Start closing with `reason`. Only the first reason sticks; returns
    /// whether this call was the one that set it.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut slot = self.close_reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        self.closing.cancel();
        true
    }

    /// Like [`close`](Self::close), but the client is sent `notice` right
    /// before the close frame, even when the outbound queue is full.
    pub fn terminate(&self, reason: CloseReason, notice: Option<&ServerFrame>) -> bool {
        let mut slot = self.close_reason.lock();
        if slot.is_some() {
            return false;
        }
        if let Some(frame) = notice {
            *self.farewell.lock() = serde_json::to_string(frame).ok();
        }
        *slot = Some(reason);
        self.closing.cancel();
        true
    }

    /// The notice set by [`terminate`](Self::terminate), taken once by the
    /// writer.
    pub fn take_farewell(&self) -> Option<String> {
        self.farewell.lock().take()
    }

    /// Why the connection is closing, if it is.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Resolves once the connection starts closing.
    pub async fn closed(&self) {
        self.closing.cancelled().await;
    }
}
