//! Networking module
//!
//! This module handles all network-related functionality for the Gommo server:
//! - WebSocket handling for browser clients
//! - Session management
//! - Connection lifecycle

pub mod buffer;
pub mod handler;
pub mod session;
