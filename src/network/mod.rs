//! Network module.
//!
//! Contains the Gateway (TCP/TLS listener), the per-connection driver,
//! and the glue that implements the engine's backend on a session.

mod bridge;
mod connection;
mod gateway;

pub use gateway::Gateway;
