//! Frame routing over the shared session channel.
//!
//! Every payload a joined connection sends is wrapped in an [`Envelope`] and
//! published to the session channel. Each subscribed connection decides
//! locally, via [`route`], whether an event is meant for it.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use relay_core::{
    BusError, BusEvent, ConnectionId, Envelope, Payload, RetryConfig, Role, ServerFrame, SessionId,
    retry_with_backoff,
};
use tracing::{debug, warn};

use crate::bus::{MessageBus, Subscription};
use crate::metrics::{RELAY_FRAMES_TOTAL, RELAY_PUBLISH_FAILURES_TOTAL};

/// What a subscribed connection should do with one channel event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Send this text to the client.
    Forward(String),
    /// Not for this connection.
    Drop,
    /// A newer connection took this role; close as superseded.
    Evict,
    /// The session is gone; notify and close.
    Kill,
}

/// Decide what the connection `my_conn`, joined to `session_id` as `my_role`,
/// does with a raw channel payload.
///
/// A connection never receives its own role's frames. Presence notices are
/// only delivered about the opposite role, and never about `greeted_peer`,
/// the peer this connection was already told about when it joined.
pub fn route(
    raw: &str,
    session_id: &SessionId,
    my_role: Role,
    my_conn: &ConnectionId,
    greeted_peer: Option<&ConnectionId>,
) -> Delivery {
    let event: BusEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "ignoring undecodable channel event");
            return Delivery::Drop;
        }
    };
    if event.session_id() != session_id {
        return Delivery::Drop;
    }
    match event {
        BusEvent::Frame(envelope) if envelope.from_role != my_role => Delivery::Forward(raw.to_owned()),
        BusEvent::PeerJoined { role, conn_id, .. } if role != my_role && greeted_peer != Some(&conn_id) => {
            notice(&ServerFrame::PeerJoined { role })
        }
        BusEvent::PeerLeft { role, .. } if role != my_role => notice(&ServerFrame::PeerLeft { role }),
        BusEvent::Superseded { role, conn_id, .. } if role == my_role && &conn_id != my_conn => Delivery::Evict,
        BusEvent::SessionKilled { .. } => Delivery::Kill,
        _ => Delivery::Drop,
    }
}

fn notice(frame: &ServerFrame) -> Delivery {
    serde_json::to_string(frame).map_or(Delivery::Drop, Delivery::Forward)
}

/// Publishes envelopes and control events on session channels.
pub struct RelayRouter {
    bus: Arc<dyn MessageBus>,
    retry: RetryConfig,
}

impl RelayRouter {
    /// Router over `bus`, retrying transient publish failures per `retry`.
    pub fn new(bus: Arc<dyn MessageBus>, retry: RetryConfig) -> Self {
        Self { bus, retry }
    }

    /// Relay a client payload from `from_role` to the session channel.
    pub async fn publish(&self, session_id: &SessionId, from_role: Role, payload: Payload) -> Result<(), BusError> {
        let envelope = Envelope::wrap(session_id.clone(), from_role, payload, Utc::now());
        match self.publish_event(&BusEvent::Frame(envelope)).await {
            Ok(()) => {
                counter!(RELAY_FRAMES_TOTAL, "role" => from_role.as_str()).increment(1);
                Ok(())
            }
            Err(e) => {
                counter!(RELAY_PUBLISH_FAILURES_TOTAL).increment(1);
                warn!(session_id = %session_id, role = %from_role, error = %e, "dropping relayed frame");
                Err(e)
            }
        }
    }

    /// Publish a control or frame event with bounded retry.
    pub async fn publish_event(&self, event: &BusEvent) -> Result<(), BusError> {
        let channel = BusEvent::channel(event.session_id());
        let text = serde_json::to_string(event)?;
        let bus = &self.bus;
        let channel = channel.as_str();
        retry_with_backoff(&self.retry, "bus.publish", move || bus.publish(channel, text.clone())).await
    }

    /// Subscribe to a session channel. Not retried: a handshake that cannot
    /// subscribe fails fast.
    pub async fn subscribe(&self, session_id: &SessionId) -> Result<Subscription, BusError> {
        self.bus.subscribe(&BusEvent::channel(session_id)).await
    }
}
