//! Shared per-session channels.
//!
//! Every instance that holds a connection for a session subscribes to that
//! session's channel. Delivery is at-most-once and in publish order per
//! channel; late subscribers see nothing published before they joined.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use futures::stream::BoxStream;
use relay_core::BusError;

pub use memory::MemoryBus;

/// Stream of raw payloads published on one channel.
pub type Subscription = BoxStream<'static, String>;

/// Publish/subscribe transport between relay instances.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` to every current subscriber of `channel`.
    /// Publishing to a channel nobody listens on is not an error.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError>;

    /// Subscribe to `channel`. The stream ends when the bus goes away.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError>;
}
