//! Error handling module
//!
//! Defines custom error types for the Gommo server.

use std::io;

use thiserror::Error;

/// Main error type for the Gommo server
#[derive(Error, Debug)]
pub enum ServerError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// World/simulation errors
    #[error("World error: {0}")]
    World(#[from] WorldError),

    /// Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Network-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timeout")]
    Timeout,

    #[error("Too many connections ({0})")]
    TooManyConnections(usize),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Player not connected: {0}")]
    PlayerNotConnected(u32),

    #[error("Outbound queue full")]
    WriteBufferFull,
}

/// Protocol-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty message")]
    EmptyMessage,

    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u8),

    #[error("Truncated payload for opcode {opcode}: needed {needed} more bytes")]
    Truncated { opcode: u8, needed: usize },

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u16, actual: u16 },

    #[error("Invalid direction: {0}")]
    InvalidDirection(u8),

    #[error("Invalid object category: {0}")]
    InvalidObjectCategory(u8),

    #[error("Invalid text encoding")]
    InvalidText,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Unexpected opcode {opcode} before session init")]
    NotInitialized { opcode: u8 },

    #[error("Non-binary frame")]
    NonBinaryFrame,

    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),
}

/// World/simulation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    #[error("Area not found: {0}")]
    AreaNotFound(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(u32),

    #[error("Object not found: {0}")]
    ObjectNotFound(u64),

    #[error("No collision-free spawn position after {0} attempts")]
    SpawnBlocked(u32),
}

/// Persistence-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Unsupported save version {found} (supported: {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    #[error("Save belongs to area {found}, expected {expected}")]
    AreaMismatch { found: String, expected: String },
}

/// Result type alias for Gommo operations
pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    /// Whether this error means the peer is gone and the connection should be reaped
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            ServerError::Network(NetworkError::ConnectionClosed)
                | ServerError::Network(NetworkError::Timeout)
                | ServerError::Network(NetworkError::WriteBufferFull)
                | ServerError::Io(_)
        )
    }
}
