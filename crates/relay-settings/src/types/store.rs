//! Registry and bus backend selection.

use serde::{Deserialize, Serialize};

/// Backend for the session registry and the message bus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process maps and broadcast channels. Single instance only.
    #[default]
    Memory,
    /// Redis hashes with TTL plus Redis pub/sub. Shared across instances.
    Redis,
}

/// Store settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Which backend to use.
    pub backend: StoreBackend,
    /// Connection URL for the Redis backend.
    pub redis_url: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}
