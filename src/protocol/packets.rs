//! Packet definitions module
//!
//! Decoding of client frames into [`ClientPacket`] and the `build_*` helpers
//! that produce server frames. [`ServerPacket`] decodes server frames and is
//! what test clients and tools use to read the server's output.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::game::entity::EntityId;
use crate::game::object::{ObjectCategory, ObjectId, ObjectKind};
use crate::game::position::{Direction, Position};
use crate::net::buffer::PacketBuffer;

use super::opcodes::{ClientOpcode, ServerOpcode};

/// Longest accepted chat line in bytes
pub const MAX_CHAT_BYTES: usize = 256;

/// A decoded client frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    Init { protocol_version: u16 },
    Ping { payload: Bytes },
    Move { direction: Direction },
    Chat { text: String },
    PlaceObject { kind: ObjectKind, position: Position },
    RemoveObject { id: ObjectId, position: Position },
    ScreenSize { width: u16, height: u16 },
}

impl ClientPacket {
    /// Decode one complete frame (opcode byte plus payload)
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (&raw, payload) = frame.split_first().ok_or(ProtocolError::EmptyMessage)?;
        let opcode = ClientOpcode::try_from(raw)?;
        let mut buf = PacketBuffer::for_opcode(raw, payload);

        let packet = match opcode {
            ClientOpcode::Init => ClientPacket::Init {
                protocol_version: buf.read_u16()?,
            },
            ClientOpcode::Ping => ClientPacket::Ping {
                payload: buf.read_rest(),
            },
            ClientOpcode::Move => {
                let raw_dir = buf.read_u8()?;
                let direction = Direction::from_u8(raw_dir).ok_or(ProtocolError::InvalidDirection(raw_dir))?;
                ClientPacket::Move { direction }
            }
            ClientOpcode::Chat => {
                if payload.len() > MAX_CHAT_BYTES {
                    return Err(ProtocolError::MessageTooLarge {
                        size: payload.len(),
                        max: MAX_CHAT_BYTES,
                    });
                }
                ClientPacket::Chat {
                    text: buf.read_text()?,
                }
            }
            ClientOpcode::PlaceObject => {
                let raw_category = buf.read_u8()?;
                let category = ObjectCategory::from_u8(raw_category)
                    .ok_or(ProtocolError::InvalidObjectCategory(raw_category))?;
                let kind = buf.read_u8()?;
                let sprite = buf.read_u16()?;
                let position = Position::new(buf.read_u32()?, buf.read_u32()?);
                ClientPacket::PlaceObject {
                    kind: ObjectKind::new(category, kind, sprite),
                    position,
                }
            }
            ClientOpcode::RemoveObject => {
                let id = buf.read_u64()?;
                let position = Position::new(buf.read_u32()?, buf.read_u32()?);
                ClientPacket::RemoveObject { id, position }
            }
            ClientOpcode::ScreenSize => ClientPacket::ScreenSize {
                width: buf.read_u16()?,
                height: buf.read_u16()?,
            },
        };
        Ok(packet)
    }

    pub fn opcode(&self) -> ClientOpcode {
        match self {
            ClientPacket::Init { .. } => ClientOpcode::Init,
            ClientPacket::Ping { .. } => ClientOpcode::Ping,
            ClientPacket::Move { .. } => ClientOpcode::Move,
            ClientPacket::Chat { .. } => ClientOpcode::Chat,
            ClientPacket::PlaceObject { .. } => ClientOpcode::PlaceObject,
            ClientPacket::RemoveObject { .. } => ClientOpcode::RemoveObject,
            ClientPacket::ScreenSize { .. } => ClientOpcode::ScreenSize,
        }
    }

    /// Encode as a client would send it
    pub fn encode(&self) -> Bytes {
        let mut buf = PacketBuffer::new();
        buf.write_u8(self.opcode().as_u8());
        match self {
            ClientPacket::Init { protocol_version } => buf.write_u16(*protocol_version),
            ClientPacket::Ping { payload } => buf.write_bytes(payload),
            ClientPacket::Move { direction } => buf.write_u8(direction.as_u8()),
            ClientPacket::Chat { text } => buf.write_bytes(text.as_bytes()),
            ClientPacket::PlaceObject { kind, position } => {
                buf.write_u8(kind.category.as_u8());
                buf.write_u8(kind.kind);
                buf.write_u16(kind.sprite);
                buf.write_u32(position.x);
                buf.write_u32(position.y);
            }
            ClientPacket::RemoveObject { id, position } => {
                buf.write_u64(*id);
                buf.write_u32(position.x);
                buf.write_u32(position.y);
            }
            ClientPacket::ScreenSize { width, height } => {
                buf.write_u16(*width);
                buf.write_u16(*height);
            }
        }
        buf.freeze()
    }
}

/// Prepend `opcode` to `payload`
pub fn frame(opcode: ServerOpcode, payload: &[u8]) -> Bytes {
    let mut buf = PacketBuffer::with_capacity(payload.len() + 1);
    buf.write_u8(opcode.as_u8());
    buf.write_bytes(payload);
    buf.freeze()
}

/// Handshake acknowledgement carrying the player's entity id and name
pub fn build_init_ack(entity: EntityId, protocol_version: u16, name: &str) -> Bytes {
    let mut buf = PacketBuffer::new();
    buf.write_u8(ServerOpcode::InitAck.as_u8());
    buf.write_u32(entity);
    buf.write_u16(protocol_version);
    buf.write_string(name);
    buf.freeze()
}

pub fn build_pong(payload: &[u8]) -> Bytes {
    frame(ServerOpcode::Pong, payload)
}

pub fn build_world_update(payload: &[u8]) -> Bytes {
    frame(ServerOpcode::WorldUpdate, payload)
}

pub fn build_chat(text: &str) -> Bytes {
    frame(ServerOpcode::Chat, text.as_bytes())
}

/// Player list, truncated to `u16::MAX` entries
pub fn build_roster(players: &[(EntityId, String)]) -> Bytes {
    let count = players.len().min(u16::MAX as usize);
    let mut buf = PacketBuffer::new();
    buf.write_u8(ServerOpcode::Roster.as_u8());
    buf.write_u16(count as u16);
    for (id, name) in &players[..count] {
        buf.write_u32(*id);
        buf.write_string(name);
    }
    buf.freeze()
}

pub fn build_disconnect(reason: &str) -> Bytes {
    frame(ServerOpcode::Disconnect, reason.as_bytes())
}

/// A decoded server frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    InitAck {
        entity: EntityId,
        protocol_version: u16,
        name: String,
    },
    Pong {
        payload: Bytes,
    },
    WorldUpdate {
        payload: Bytes,
    },
    Chat {
        text: String,
    },
    Roster {
        players: Vec<(EntityId, String)>,
    },
    Disconnect {
        reason: String,
    },
}

impl ServerPacket {
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (&raw, payload) = frame.split_first().ok_or(ProtocolError::EmptyMessage)?;
        let opcode = ServerOpcode::try_from(raw)?;
        let mut buf = PacketBuffer::for_opcode(raw, payload);

        let packet = match opcode {
            ServerOpcode::InitAck => ServerPacket::InitAck {
                entity: buf.read_u32()?,
                protocol_version: buf.read_u16()?,
                name: buf.read_string()?,
            },
            ServerOpcode::Pong => ServerPacket::Pong {
                payload: buf.read_rest(),
            },
            ServerOpcode::WorldUpdate => ServerPacket::WorldUpdate {
                payload: buf.read_rest(),
            },
            ServerOpcode::Chat => ServerPacket::Chat {
                text: buf.read_text()?,
            },
            ServerOpcode::Roster => {
                let count = buf.read_u16()? as usize;
                let mut players = Vec::with_capacity(count);
                for _ in 0..count {
                    players.push((buf.read_u32()?, buf.read_string()?));
                }
                ServerPacket::Roster { players }
            }
            ServerOpcode::Disconnect => ServerPacket::Disconnect {
                reason: buf.read_text()?,
            },
        };
        Ok(packet)
    }
}
