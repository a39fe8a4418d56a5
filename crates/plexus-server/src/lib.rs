//! # plexus-server
//!
//! Real-time module message broker.
//!
//! - [`broker`]: Peer Registry, Module Directory, and the Event Router
//! - [`websocket`]: per-connection queue, heartbeat, and session loop
//! - [`server`]: axum routes for `/ws`, `/api/modules`, `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod broker;
pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use broker::{Broker, BrokerConfig, Routed};
pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::PlexusServer;
