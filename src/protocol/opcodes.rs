//! Wire opcodes
//!
//! Every frame is one opcode byte followed by a little-endian payload.

use crate::error::ProtocolError;

/// Client to server opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientOpcode {
    /// `u16 protocol_version`
    Init = 0,
    /// Opaque bytes, echoed back
    Ping = 1,
    /// `u8 direction`
    Move = 2,
    /// UTF-8 text; a leading `/` makes it a command
    Chat = 3,
    /// `u8 category, u8 kind, u16 sprite, u32 x, u32 y`
    PlaceObject = 4,
    /// `u64 object_id, u32 x, u32 y`
    RemoveObject = 5,
    /// `u16 width, u16 height`
    ScreenSize = 6,
}

impl ClientOpcode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientOpcode::Init => "INIT",
            ClientOpcode::Ping => "PING",
            ClientOpcode::Move => "MOVE",
            ClientOpcode::Chat => "CHAT",
            ClientOpcode::PlaceObject => "PLACE_OBJECT",
            ClientOpcode::RemoveObject => "REMOVE_OBJECT",
            ClientOpcode::ScreenSize => "SCREEN_SIZE",
        }
    }
}

impl TryFrom<u8> for ClientOpcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ClientOpcode::Init),
            1 => Ok(ClientOpcode::Ping),
            2 => Ok(ClientOpcode::Move),
            3 => Ok(ClientOpcode::Chat),
            4 => Ok(ClientOpcode::PlaceObject),
            5 => Ok(ClientOpcode::RemoveObject),
            6 => Ok(ClientOpcode::ScreenSize),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// Server to client opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerOpcode {
    /// `u32 entity_id, u16 protocol_version, string name`
    InitAck = 0,
    /// Echo of a ping payload
    Pong = 1,
    /// Snapshot payload
    WorldUpdate = 2,
    /// UTF-8 text
    Chat = 3,
    /// `u16 count, count x (u32 id, string name)`
    Roster = 4,
    /// UTF-8 reason, sent before the server closes the connection
    Disconnect = 5,
}

impl ServerOpcode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ServerOpcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServerOpcode::InitAck),
            1 => Ok(ServerOpcode::Pong),
            2 => Ok(ServerOpcode::WorldUpdate),
            3 => Ok(ServerOpcode::Chat),
            4 => Ok(ServerOpcode::Roster),
            5 => Ok(ServerOpcode::Disconnect),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}
