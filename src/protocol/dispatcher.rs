//! Client packet dispatcher
//!
//! Decodes one frame at a time for a session and applies it to the world.
//! Every handler that touches the simulation takes the world lock, so client
//! commands are serialized with the tick's mutation phase. Frames are only
//! queued after the lock is released.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::error::{ProtocolError, Result, ServerError, WorldError};
use crate::game::entity::{CombatMode, EntityId};
use crate::game::object::{ObjectId, ObjectKind};
use crate::game::position::Position;
use crate::game::world::World;
use crate::net::session::{Session, SessionManager};

use super::commands::{TextCommand, HELP_TEXT};
use super::outbound::Outbound;
use super::packets::{self, ClientPacket};

/// Applies client packets to the world on behalf of sessions
pub struct Dispatcher {
    world: Arc<World>,
    sessions: Arc<SessionManager>,
    protocol_version: u16,
}

impl Dispatcher {
    pub fn new(world: Arc<World>, sessions: Arc<SessionManager>) -> Self {
        Self {
            world,
            sessions,
            protocol_version: crate::PROTOCOL_VERSION,
        }
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Handle one client frame.
    ///
    /// An error means the connection must be terminated; the caller sends
    /// the disconnect notice for protocol errors.
    pub fn dispatch(&self, session: &Session, frame: &[u8]) -> Result<()> {
        session.touch();
        let packet = ClientPacket::decode(frame)?;
        trace!(
            session_id = session.id,
            opcode = packet.opcode().name(),
            len = frame.len(),
            "Packet received"
        );

        match packet {
            ClientPacket::Ping { payload } => {
                session.try_send(packets::build_pong(&payload))?;
                Ok(())
            }
            ClientPacket::Init { protocol_version } => self.handle_init(session, protocol_version),
            other => {
                let entity = session
                    .entity()
                    .filter(|_| session.state().can_play())
                    .ok_or(ProtocolError::NotInitialized {
                        opcode: other.opcode().as_u8(),
                    })?;
                self.handle_gameplay(session, entity, other)
            }
        }
    }

    fn handle_init(&self, session: &Session, protocol_version: u16) -> Result<()> {
        if session.entity().is_some() {
            debug!(session_id = session.id, "Repeated init ignored");
            return Ok(());
        }

        if protocol_version != self.protocol_version {
            return Err(ProtocolError::VersionMismatch {
                expected: self.protocol_version,
                actual: protocol_version,
            }
            .into());
        }

        let spawned = {
            let mut sim = self.world.lock();
            sim.spawn_player(&mut rand::thread_rng()).map(|id| {
                let name = sim.entity(id).map(|e| e.name.clone()).unwrap_or_default();
                (id, name, sim.players())
            })
        };
        let (entity, name, roster) = match spawned {
            Ok(joined) => joined,
            Err(e) => {
                let _ = session.try_send(packets::build_disconnect("World is full"));
                return Err(e);
            }
        };

        self.sessions.bind_entity(session.id, entity);
        session.try_send(packets::build_init_ack(entity, self.protocol_version, &name))?;
        session.try_send(packets::build_chat(&format!(
            "Welcome to {}! Type /help for commands.",
            self.world.settings.name
        )))?;

        self.sessions
            .broadcast(packets::build_chat(&format!("{} joined the game.", name)));
        self.sessions.broadcast(packets::build_roster(&roster));

        info!(
            session_id = session.id,
            entity_id = entity,
            name = %name,
            address = %session.address,
            "Player joined"
        );
        Ok(())
    }

    fn handle_gameplay(&self, session: &Session, entity: EntityId, packet: ClientPacket) -> Result<()> {
        match packet {
            ClientPacket::Move { direction } => self.world.lock().set_move_direction(entity, direction),
            ClientPacket::Chat { text } => match TextCommand::parse(&text) {
                Some(command) => self.handle_command(session, entity, command),
                None => self.handle_chat(entity, &text),
            },
            ClientPacket::PlaceObject { kind, position } => self.handle_place(session, entity, kind, position),
            ClientPacket::RemoveObject { id, position } => self.handle_remove(session, entity, id, position),
            ClientPacket::ScreenSize { width, height } => {
                let radius = self.view_radius_for(width, height);
                session.set_view_radius(radius);
                debug!(
                    session_id = session.id,
                    width = width,
                    height = height,
                    view_radius = radius,
                    "Screen size reported"
                );
                Ok(())
            }
            ClientPacket::Init { .. } | ClientPacket::Ping { .. } => Ok(()),
        }
    }

    fn handle_chat(&self, entity: EntityId, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let name = self.entity_name(entity)?;
        self.sessions
            .broadcast(packets::build_chat(&format!("{}: {}", name, text)));
        Ok(())
    }

    fn handle_command(&self, session: &Session, entity: EntityId, command: TextCommand) -> Result<()> {
        debug!(session_id = session.id, entity_id = entity, command = ?command, "Text command");

        match command {
            TextCommand::Name(new_name) => {
                let renamed = {
                    let mut sim = self.world.lock();
                    let taken = sim
                        .players()
                        .iter()
                        .any(|(id, name)| *id != entity && name.eq_ignore_ascii_case(&new_name));
                    if taken {
                        None
                    } else {
                        let old = sim.rename(entity, new_name.clone())?;
                        Some((old, sim.players()))
                    }
                };
                match renamed {
                    Some((old, roster)) => {
                        info!(entity_id = entity, old = %old, new = %new_name, "Player renamed");
                        self.sessions.broadcast(packets::build_chat(&format!(
                            "{} is now known as {}.",
                            old, new_name
                        )));
                        self.sessions.broadcast(packets::build_roster(&roster));
                        Ok(())
                    }
                    None => reply(session, "That name is already taken."),
                }
            }
            TextCommand::Mode(mode) => {
                self.world.lock().set_mode(entity, mode)?;
                let label = match mode {
                    CombatMode::Attack => "Combat mode: attack.",
                    CombatMode::Heal => "Combat mode: heal.",
                };
                reply(session, label)
            }
            TextCommand::Who => {
                let players = self.world.lock().players();
                let names: Vec<&str> = players.iter().map(|(_, name)| name.as_str()).collect();
                reply(
                    session,
                    &format!("Players online ({}): {}", names.len(), names.join(", ")),
                )
            }
            TextCommand::Help => reply(session, HELP_TEXT),
            TextCommand::Usage(usage) => reply(session, usage),
            TextCommand::Unknown(word) => reply(
                session,
                &format!("Unknown command: /{}. Type /help for commands.", word),
            ),
        }
    }

    fn handle_place(&self, session: &Session, entity: EntityId, kind: ObjectKind, position: Position) -> Result<()> {
        if !self.world.settings.editor_enabled {
            return reply(session, "The editor is disabled on this server.");
        }
        let id = {
            let mut sim = self.world.lock();
            let area = sim
                .entity(entity)
                .map(|e| e.area)
                .ok_or(WorldError::EntityNotFound(entity))?;
            sim.place_object(area, kind, position)?
        };
        info!(entity_id = entity, object_id = id, position = %position, "Object placed");
        Ok(())
    }

    fn handle_remove(&self, session: &Session, entity: EntityId, id: ObjectId, position: Position) -> Result<()> {
        if !self.world.settings.editor_enabled {
            return reply(session, "The editor is disabled on this server.");
        }
        let removed = {
            let mut sim = self.world.lock();
            let area = sim
                .entity(entity)
                .map(|e| e.area)
                .ok_or(WorldError::EntityNotFound(entity))?;
            sim.remove_object(area, id, position)
        };
        match removed {
            Ok(_) => {
                info!(entity_id = entity, object_id = id, "Object removed");
                Ok(())
            }
            Err(ServerError::World(WorldError::ObjectNotFound(_))) => reply(session, "No such object."),
            Err(e) => Err(e),
        }
    }

    /// Tear down a session: despawn its player and tell everyone else
    pub fn leave(&self, session: &Session, reason: &str) {
        self.sessions.remove(session.id);
        let entity = match session.entity() {
            Some(entity) => entity,
            None => return,
        };
        session.set_entity(None);

        let (name, roster) = {
            let mut sim = self.world.lock();
            let name = sim.despawn(entity);
            (name, sim.players())
        };

        if let Some(name) = name {
            info!(session_id = session.id, entity_id = entity, name = %name, reason = %reason, "Player left");
            self.sessions.broadcast(packets::build_chat(&format!(
                "{} left the game. ({})",
                name, reason
            )));
            self.sessions.broadcast(packets::build_roster(&roster));
        }
    }

    /// Chunk radius covering half the reported screen, plus a margin of one
    fn view_radius_for(&self, width: u16, height: u16) -> u32 {
        let world = &self.world.settings.world;
        let half = u32::from(width.max(height)) / 2;
        let radius = half.div_ceil(world.chunk_size) + 1;
        radius.clamp(1, world.max_view_radius.max(1))
    }

    fn entity_name(&self, entity: EntityId) -> Result<String> {
        self.world
            .lock()
            .entity(entity)
            .filter(|e| e.valid)
            .map(|e| e.name.clone())
            .ok_or_else(|| WorldError::EntityNotFound(entity).into())
    }
}

/// Private chat line to one session
fn reply(session: &Session, text: &str) -> Result<()> {
    session.try_send(packets::build_chat(text))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::WorldSettings;
    use crate::net::session::SessionState;
    use crate::protocol::packets::ServerPacket;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn setup(settings: WorldSettings) -> (Dispatcher, Arc<Session>, mpsc::Receiver<Bytes>) {
        let world = Arc::new(World::with_settings(settings));
        let sessions = Arc::new(SessionManager::new(16, 2));
        let (tx, rx) = mpsc::channel(64);
        let session = sessions
            .create_session_with_channel("127.0.0.1:4000".parse().unwrap(), tx)
            .unwrap();
        (Dispatcher::new(world, sessions), session, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<ServerPacket> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(ServerPacket::decode(&frame).unwrap());
        }
        out
    }

    fn init(dispatcher: &Dispatcher, session: &Session) {
        let frame = ClientPacket::Init {
            protocol_version: crate::PROTOCOL_VERSION,
        }
        .encode();
        dispatcher.dispatch(session, &frame).unwrap();
    }

    #[test]
    fn test_init_spawns_player() {
        let (dispatcher, session, mut rx) = setup(WorldSettings::default());
        init(&dispatcher, &session);

        let entity = session.entity().unwrap();
        assert_eq!(session.state(), SessionState::Playing);
        let packets = drain(&mut rx);
        assert!(matches!(
            &packets[0],
            ServerPacket::InitAck { entity: id, .. } if *id == entity
        ));
        assert!(packets.contains(&ServerPacket::Chat {
            text: format!("Player-{} joined the game.", entity)
        }));
        assert!(packets.contains(&ServerPacket::Roster {
            players: vec![(entity, format!("Player-{}", entity))]
        }));
    }

    #[test]
    fn test_version_mismatch() {
        let (dispatcher, session, mut rx) = setup(WorldSettings::default());
        let frame = ClientPacket::Init { protocol_version: 99 }.encode();
        let err = dispatcher.dispatch(&session, &frame).unwrap_err();

        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::VersionMismatch { actual: 99, .. })
        ));
        assert!(drain(&mut rx).is_empty());
        assert!(session.entity().is_none());
    }

    #[test]
    fn test_gameplay_before_init() {
        let (dispatcher, session, _rx) = setup(WorldSettings::default());
        let frame = ClientPacket::Move {
            direction: crate::game::position::Direction::North,
        }
        .encode();
        let err = dispatcher.dispatch(&session, &frame).unwrap_err();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::NotInitialized { opcode: 2 })
        ));
    }

    #[test]
    fn test_ping_before_init() {
        let (dispatcher, session, mut rx) = setup(WorldSettings::default());
        let frame = ClientPacket::Ping {
            payload: Bytes::from_static(b"abc"),
        }
        .encode();
        dispatcher.dispatch(&session, &frame).unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![ServerPacket::Pong {
                payload: Bytes::from_static(b"abc")
            }]
        );
    }

    #[test]
    fn test_view_radius_from_screen_size() {
        let (dispatcher, session, _rx) = setup(WorldSettings::default());
        init(&dispatcher, &session);

        let frame = ClientPacket::ScreenSize { width: 800, height: 600 }.encode();
        dispatcher.dispatch(&session, &frame).unwrap();
        // 400 / 256 rounds up to 2, plus one
        assert_eq!(session.view_radius(), 3);

        let frame = ClientPacket::ScreenSize { width: 60000, height: 10 }.encode();
        dispatcher.dispatch(&session, &frame).unwrap();
        assert_eq!(session.view_radius(), 4);

        let frame = ClientPacket::ScreenSize { width: 0, height: 0 }.encode();
        dispatcher.dispatch(&session, &frame).unwrap();
        assert_eq!(session.view_radius(), 1);
    }

    #[test]
    fn test_editor_disabled_replies() {
        let (dispatcher, session, mut rx) = setup(WorldSettings::default());
        init(&dispatcher, &session);
        drain(&mut rx);

        let frame = ClientPacket::RemoveObject {
            id: 1,
            position: Position::CENTER,
        }
        .encode();
        dispatcher.dispatch(&session, &frame).unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![ServerPacket::Chat {
                text: "The editor is disabled on this server.".into()
            }]
        );
    }

    #[test]
    fn test_leave_despawns() {
        let (dispatcher, session, _rx) = setup(WorldSettings::default());
        init(&dispatcher, &session);
        let entity = session.entity().unwrap();

        dispatcher.leave(&session, "Connection closed");
        assert!(session.entity().is_none());
        assert!(dispatcher.sessions().get(session.id).is_none());
        let sim = dispatcher.world().lock();
        assert!(sim.entity(entity).map_or(true, |e| !e.valid));
        assert!(sim.players().is_empty());
    }
}
