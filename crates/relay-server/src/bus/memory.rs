//! In-process bus over `tokio::sync::broadcast`.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use relay_core::BusError;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use super::{MessageBus, Subscription};

/// Per-channel buffer. A subscriber that falls this far behind skips ahead.
const CHANNEL_CAPACITY: usize = 1024;

/// Single-instance [`MessageBus`].
#[derive(Default)]
pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl MemoryBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels that currently exist.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        let delivered = match self.channels.get(channel) {
            Some(sender) => sender.send(payload).is_ok(),
            None => return Ok(()),
        };
        if !delivered {
            // last subscriber is gone
            let _ = self
                .channels
                .remove_if(channel, |_, sender| sender.receiver_count() == 0);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        let rx = self
            .channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        let name = channel.to_owned();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let out = match item {
                Ok(payload) => Some(payload),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(channel = %name, skipped, "bus subscriber lagged");
                    None
                }
            };
            futures::future::ready(out)
        });
        Ok(stream.boxed())
    }
}
