//! Protocol module
//!
//! This module contains the wire protocol of the Gommo server:
//! - Opcodes and packet layouts (one opcode byte, little-endian payload)
//! - Chat text commands
//! - The connection boundary used by the simulation
//! - The dispatcher applying client packets to the world

pub mod commands;
pub mod dispatcher;
pub mod opcodes;
pub mod outbound;
pub mod packets;

pub use dispatcher::Dispatcher;
pub use opcodes::{ClientOpcode, ServerOpcode};
pub use outbound::{Outbound, Viewer};
pub use packets::{ClientPacket, ServerPacket};
