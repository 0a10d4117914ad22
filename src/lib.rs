//! snowgate - an IRC gateway to a snowflake-identified chat backend.
//!
//! Clients speak ordinary IRC to the gateway; the gateway speaks the
//! backend's WebSocket/REST protocol upstream. Connections that log into
//! the same backend account share one backend session.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod idmap;
pub mod network;
pub mod registry;
pub mod render;
pub mod session;
