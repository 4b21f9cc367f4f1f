//! # relay-server
//!
//! Axum HTTP + WebSocket pairing relay.
//!
//! Two peers (a workstation and a phone) join a session by presenting its
//! id and token; every payload one sends is relayed to the other through
//! the session's shared channel. Session state lives in a pluggable
//! [`SessionStore`](registry::SessionStore), cross-instance fan-out in a
//! pluggable [`MessageBus`](bus::MessageBus). In-memory implementations
//! serve a single instance; the `redis` feature adds shared ones.

#![deny(unsafe_code)]

pub mod bus;
pub mod config;
pub mod health;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, RelayServer};
