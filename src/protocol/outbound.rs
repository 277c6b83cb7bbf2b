//! Connection boundary
//!
//! The simulation never touches sockets. It asks an [`Outbound`] for the set
//! of connected viewers and hands it finished frames; a failed send means the
//! connection is lost and the implementation must arrange for teardown.

use bytes::Bytes;

use crate::error::NetworkError;
use crate::game::entity::EntityId;

/// A connected player that receives snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub entity: EntityId,
    /// Snapshot radius in chunks
    pub view_radius: u32,
}

/// Outbound side of all player connections
pub trait Outbound: Send + Sync {
    /// Players currently in game
    fn viewers(&self) -> Vec<Viewer>;

    /// Queue a complete frame for one player
    fn send_frame(&self, entity: EntityId, frame: Bytes) -> Result<(), NetworkError>;

    /// Queue a frame for every player in game
    fn broadcast(&self, frame: Bytes);

    /// Ask the connection of `entity` to shut down
    fn disconnect(&self, entity: EntityId, reason: &str);
}
