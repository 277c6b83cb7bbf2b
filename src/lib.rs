//! Gommo Game Server Library
//!
//! This library provides the core functionality for the Gommo world server:
//! an authoritative, chunked simulation that streams per-tick snapshots to
//! WebSocket clients.
//!
//! ## Modules
//!
//! - `config` - Server configuration management
//! - `error` - Error types and result definitions
//! - `game` - Simulation core: spatial index, movement, combat, tick scheduler
//! - `net` - Network handling and session management
//! - `protocol` - Wire protocol, text commands and packet dispatch

pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod protocol;
pub mod state;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use state::AppState;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version (must match client)
pub const PROTOCOL_VERSION: u16 = 1;
