//! WebSocket transport: one task group per accepted socket.

pub mod connection;
pub mod hub;
pub mod session;
pub mod silence;
