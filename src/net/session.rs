//! Session management module
//!
//! Manages client sessions including:
//! - Session lifecycle (creation, tracking, cleanup)
//! - Session state machine (connected -> playing -> closing)
//! - Per-session data (bound entity, view radius, outbound queue)
//! - Thread-safe session registry, which is also the simulation's
//!   connection boundary ([`Outbound`])

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, Result, ServerError};
use crate::game::entity::EntityId;
use crate::protocol::outbound::{Outbound, Viewer};
use crate::protocol::packets;

/// Unique session identifier
pub type SessionId = u64;

/// Session state in the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Socket open, waiting for Init
    Connected,
    /// Init accepted, the session owns a player entity
    Playing,
    /// Teardown requested
    Closing,
}

impl SessionState {
    /// Check if the session is in a state where it can receive gameplay packets
    pub fn can_play(&self) -> bool {
        matches!(self, SessionState::Playing)
    }

    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connected => "Connected",
            SessionState::Playing => "Playing",
            SessionState::Closing => "Closing",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A connected client session
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Current session state
    state: RwLock<SessionState>,
    /// Player entity owned by this session (set after Init)
    entity: RwLock<Option<EntityId>>,
    /// Snapshot radius in chunks
    view_radius: AtomicU32,
    /// Why the session is closing, if it is
    close_reason: RwLock<Option<String>>,
    close: Notify,
    /// Time of session creation
    pub created_at: Instant,
    /// Time of last activity
    last_activity: RwLock<Instant>,
    /// Outbound frame queue drained by the connection's writer task
    outbound_tx: mpsc::Sender<Bytes>,
}

impl Session {
    /// Create a new session with an outbound channel
    pub fn new(id: SessionId, address: SocketAddr, view_radius: u32, outbound_tx: mpsc::Sender<Bytes>) -> Self {
        let now = Instant::now();
        Self {
            id,
            address,
            state: RwLock::new(SessionState::Connected),
            entity: RwLock::new(None),
            view_radius: AtomicU32::new(view_radius),
            close_reason: RwLock::new(None),
            close: Notify::new(),
            created_at: now,
            last_activity: RwLock::new(now),
            outbound_tx,
        }
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Set the session state
    pub fn set_state(&self, new_state: SessionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };
        debug!(
            session_id = self.id,
            old_state = %old_state,
            new_state = %new_state,
            "Session state changed"
        );
    }

    /// Transition to a new state if currently in the expected state
    pub fn transition_state(&self, expected: SessionState, new_state: SessionState) -> bool {
        let mut state = self.state.write();
        if *state == expected {
            *state = new_state;
            true
        } else {
            false
        }
    }

    /// Entity owned by this session
    pub fn entity(&self) -> Option<EntityId> {
        *self.entity.read()
    }

    pub(crate) fn set_entity(&self, entity: Option<EntityId>) {
        *self.entity.write() = entity;
    }

    pub fn view_radius(&self) -> u32 {
        self.view_radius.load(Ordering::Relaxed)
    }

    pub fn set_view_radius(&self, radius: u32) {
        self.view_radius.store(radius, Ordering::Relaxed);
    }

    /// Update the last activity timestamp
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Get the last activity time
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    /// Get the duration since last activity
    pub fn idle_duration(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// Queue a frame without blocking
    pub fn try_send(&self, frame: Bytes) -> std::result::Result<(), NetworkError> {
        self.outbound_tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => NetworkError::WriteBufferFull,
            TrySendError::Closed(_) => NetworkError::ConnectionClosed,
        })
    }

    /// Ask the connection handler to shut this session down.
    ///
    /// The first reason wins; later requests only re-notify.
    pub fn request_close(&self, reason: &str) {
        {
            let mut current = self.close_reason.write();
            if current.is_none() {
                *current = Some(reason.to_string());
            }
        }
        self.set_state(SessionState::Closing);
        self.close.notify_one();
    }

    /// Reason given to [`Session::request_close`]
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.read().clone()
    }

    /// Resolves once a close has been requested
    pub async fn closed(&self) {
        if self.state() == SessionState::Closing {
            return;
        }
        self.close.notified().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("entity", &self.entity())
            .field("view_radius", &self.view_radius())
            .field("created_at", &self.created_at)
            .field("idle_duration", &self.idle_duration())
            .finish()
    }
}

/// Thread-safe session manager
pub struct SessionManager {
    /// Map of session ID to session
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Map of player entity to session ID (for in-game sessions)
    entity_to_session: DashMap<EntityId, SessionId>,
    /// Next session ID to assign
    next_id: AtomicU64,
    /// Serializes the connection cap check with the insert
    admission: Mutex<()>,
    /// Maximum concurrent sessions
    max_connections: usize,
    /// View radius new sessions start with
    default_view_radius: u32,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(max_connections: usize, default_view_radius: u32) -> Self {
        Self {
            sessions: DashMap::new(),
            entity_to_session: DashMap::new(),
            next_id: AtomicU64::new(1),
            admission: Mutex::new(()),
            max_connections,
            default_view_radius,
        }
    }

    /// Create a session with an outbound channel and register it
    pub fn create_session_with_channel(
        &self,
        address: SocketAddr,
        outbound_tx: mpsc::Sender<Bytes>,
    ) -> Result<Arc<Session>> {
        let _admission = self.admission.lock();
        let current_count = self.sessions.len();
        if current_count >= self.max_connections {
            warn!(
                address = %address,
                count = current_count,
                max = self.max_connections,
                "Connection limit reached"
            );
            return Err(ServerError::Network(NetworkError::TooManyConnections(
                self.max_connections,
            )));
        }

        // Generate session ID
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let session = Arc::new(Session::new(id, address, self.default_view_radius, outbound_tx));
        self.sessions.insert(id, session.clone());

        info!(session_id = id, address = %address, "Session created");

        Ok(session)
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// Get the session that owns a player entity
    pub fn get_by_entity(&self, entity: EntityId) -> Option<Arc<Session>> {
        self.entity_to_session
            .get(&entity)
            .and_then(|id| self.get(*id))
    }

    /// Bind a spawned player entity to its session and mark it playing
    pub fn bind_entity(&self, session_id: SessionId, entity: EntityId) {
        if let Some(session) = self.get(session_id) {
            session.set_entity(Some(entity));
            self.entity_to_session.insert(entity, session_id);
            if !session.transition_state(SessionState::Connected, SessionState::Playing) {
                debug!(session_id = session_id, state = %session.state(), "Session left Connected before binding");
            }
            debug!(session_id = session_id, entity_id = entity, "Entity bound to session");
        }
    }

    /// Remove a session
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(&id)?;
        if let Some(entity) = session.entity() {
            self.entity_to_session.remove(&entity);
        }
        info!(
            session_id = id,
            entity_id = ?session.entity(),
            reason = ?session.close_reason(),
            "Session removed"
        );
        Some(session)
    }

    /// Send a disconnect notice to every session and ask them to close
    pub fn disconnect_all(&self, reason: &str) {
        let frame = packets::build_disconnect(reason);
        for session in self.sessions.iter() {
            let _ = session.try_send(frame.clone());
            session.request_close(reason);
        }
    }

    /// Get the count of active sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Get the count of sessions per state
    pub fn count_by_state(&self) -> HashMap<SessionState, usize> {
        let mut counts = HashMap::new();
        for session in self.sessions.iter() {
            *counts.entry(session.state()).or_insert(0) += 1;
        }
        counts
    }

    /// Get the count of in-game players
    pub fn player_count(&self) -> usize {
        self.entity_to_session.len()
    }
}

impl Outbound for SessionManager {
    fn viewers(&self) -> Vec<Viewer> {
        self.sessions
            .iter()
            .filter(|s| s.state().can_play())
            .filter_map(|s| {
                s.entity().map(|entity| Viewer {
                    entity,
                    view_radius: s.view_radius(),
                })
            })
            .collect()
    }

    fn send_frame(&self, entity: EntityId, frame: Bytes) -> std::result::Result<(), NetworkError> {
        let session = self
            .get_by_entity(entity)
            .ok_or(NetworkError::PlayerNotConnected(entity))?;
        session.try_send(frame)
    }

    fn broadcast(&self, frame: Bytes) {
        for session in self.sessions.iter() {
            if !session.state().can_play() {
                continue;
            }
            if let Err(e) = session.try_send(frame.clone()) {
                debug!(session_id = session.id, error = %e, "Broadcast send failed");
                session.request_close("Connection lost");
            }
        }
    }

    fn disconnect(&self, entity: EntityId, reason: &str) {
        if let Some(session) = self.get_by_entity(entity) {
            let _ = session.try_send(packets::build_disconnect(reason));
            session.request_close(reason);
        }
    }
}
