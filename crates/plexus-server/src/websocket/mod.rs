//! WebSocket transport: per-connection queue, heartbeat, and session loop.

pub mod connection;
pub mod heartbeat;
pub mod session;
