//! # relay-core
//!
//! Foundation types for the pairing relay.
//!
//! - Branded ids for sessions and connections
//! - The two participant [`Role`](role::Role)s
//! - Wire protocol: client frames, server frames, bus events, relay envelope,
//!   close reasons
//! - Application payloads the HTTP ingest endpoints construct
//! - Error taxonomy shared by the registry, bus, and gateway
//! - Retry with exponential backoff, and `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod app;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod retry;
pub mod role;

pub use app::AppMessage;
pub use errors::{BusError, HandshakeError, RelayError, StoreError};
pub use ids::{ConnectionId, SessionId, generate_token};
pub use protocol::{BusEvent, ClientFrame, CloseReason, Envelope, Hello, Payload, ServerFrame};
pub use retry::{RetryConfig, Retryable, retry_with_backoff};
pub use role::Role;
