//! Spatial index
//!
//! An [`Area`] maps chunk coordinates to [`Chunk`] buckets. Structural changes
//! to the chunk map go through the area-level `RwLock`; a chunk's contents and
//! its serialized cache sit behind the chunk-level `Mutex`. Lock order is
//! always area, then chunk, and no chunk lock is held while taking the area lock.
//!
//! Missing chunks and missing members are logged and ignored rather than
//! treated as errors; one bad reference must never stop a tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, trace};

use super::entity::{AreaId, EntityId};
use super::object::{ObjectId, WorldObject};
use super::position::{ChunkCoord, Position};
use super::unordered::UnorderedList;

/// Serialized snapshot sections for one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSections {
    pub entity_count: u32,
    pub entities: Bytes,
    pub object_count: u32,
    pub objects: Bytes,
}

/// Whether a section lookup was served from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

/// Tick-stamped cache of a chunk's serialized sections
#[derive(Debug, Default)]
struct ChunkCache {
    stamp: Option<u64>,
    sections: ChunkSections,
    last_access: u64,
}

impl ChunkCache {
    fn invalidate(&mut self) {
        self.stamp = None;
    }

    fn is_valid_for(&self, tick: u64) -> bool {
        self.stamp == Some(tick)
    }

    fn release(&mut self) {
        self.stamp = None;
        self.sections = ChunkSections::default();
    }

    fn is_allocated(&self) -> bool {
        !self.sections.entities.is_empty() || !self.sections.objects.is_empty()
    }
}

/// Members of a chunk plus its serialized cache
#[derive(Debug, Default)]
pub struct ChunkContents {
    entities: UnorderedList<EntityId>,
    objects: UnorderedList<WorldObject>,
    cache: ChunkCache,
}

impl ChunkContents {
    pub fn entities(&self) -> &UnorderedList<EntityId> {
        &self.entities
    }

    pub fn objects(&self) -> &UnorderedList<WorldObject> {
        &self.objects
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.objects.is_empty()
    }

    /// Whether the cached sections are stamped with `tick`
    pub fn cache_valid_for(&self, tick: u64) -> bool {
        self.cache.is_valid_for(tick)
    }
}

/// A square bucket of the area grid
#[derive(Debug)]
pub struct Chunk {
    coord: ChunkCoord,
    contents: Mutex<ChunkContents>,
}

impl Chunk {
    fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            contents: Mutex::new(ChunkContents::default()),
        }
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Lock the chunk contents
    pub fn lock(&self) -> MutexGuard<'_, ChunkContents> {
        self.contents.lock()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.lock().entities.iter().copied().collect()
    }

    pub fn objects(&self) -> Vec<WorldObject> {
        self.lock().objects.iter().copied().collect()
    }

    pub fn entity_count(&self) -> usize {
        self.lock().entities.len()
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.lock().entities.find(|e| **e == id).is_some()
    }

    /// Drop the cached sections so the next lookup rebuilds them
    pub fn invalidate(&self) {
        self.lock().cache.invalidate();
    }

    /// Cached sections for `tick`, rebuilding them with `build` on a stale cache
    pub fn sections<F>(&self, tick: u64, build: F) -> (ChunkSections, CacheOutcome)
    where
        F: FnOnce(&[EntityId], &[WorldObject]) -> ChunkSections,
    {
        let mut contents = self.lock();
        contents.cache.last_access = tick;
        if contents.cache.is_valid_for(tick) {
            return (contents.cache.sections.clone(), CacheOutcome::Hit);
        }

        let sections = build(contents.entities.as_slice(), contents.objects.as_slice());
        contents.cache.sections = sections.clone();
        contents.cache.stamp = Some(tick);
        (sections, CacheOutcome::Miss)
    }
}

/// A named world region
#[derive(Debug)]
pub struct Area {
    id: AreaId,
    name: String,
    chunk_size: u32,
    chunks: RwLock<HashMap<ChunkCoord, Arc<Chunk>>>,
    dirty: AtomicBool,
}

impl Area {
    pub fn new(id: AreaId, name: impl Into<String>, chunk_size: u32) -> Self {
        Self {
            id,
            name: name.into(),
            chunk_size: chunk_size.max(1),
            chunks: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> AreaId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Bucket coordinate for a position
    pub fn coord_of(&self, pos: Position) -> ChunkCoord {
        pos.chunk(self.chunk_size)
    }

    /// Chunk containing `pos`, if it exists
    pub fn chunk_at(&self, pos: Position) -> Option<Arc<Chunk>> {
        self.chunk_at_coord(self.coord_of(pos))
    }

    pub fn chunk_at_coord(&self, coord: ChunkCoord) -> Option<Arc<Chunk>> {
        self.chunks.read().get(&coord).cloned()
    }

    /// Chunk containing `pos`, created on demand
    pub fn ensure_chunk(&self, pos: Position) -> Arc<Chunk> {
        let coord = self.coord_of(pos);
        if let Some(chunk) = self.chunk_at_coord(coord) {
            return chunk;
        }

        let mut chunks = self.chunks.write();
        chunks
            .entry(coord)
            .or_insert_with(|| {
                trace!(area = %self.name, x = coord.x, y = coord.y, "Created chunk");
                Arc::new(Chunk::new(coord))
            })
            .clone()
    }

    /// Existing chunks in the square of `radius` chunks around `center`
    pub fn neighborhood(&self, center: Position, radius: u32) -> Vec<Arc<Chunk>> {
        let chunks = self.chunks.read();
        self.coord_of(center)
            .square(radius)
            .filter_map(|coord| chunks.get(&coord).cloned())
            .collect()
    }

    pub fn insert_entity(&self, id: EntityId, pos: Position) {
        let chunk = self.ensure_chunk(pos);
        let mut contents = chunk.lock();
        contents.entities.push(id);
        contents.cache.invalidate();
    }

    /// Remove an entity from the chunk at `pos`; returns whether it was found
    pub fn remove_entity(&self, id: EntityId, pos: Position) -> bool {
        let Some(chunk) = self.chunk_at(pos) else {
            debug!(area = %self.name, entity_id = id, "Remove from missing chunk ignored");
            return false;
        };
        let mut contents = chunk.lock();
        let removed = contents.entities.remove_where(|e| *e == id).is_some();
        if removed {
            contents.cache.invalidate();
        } else {
            debug!(area = %self.name, entity_id = id, "Entity not in expected chunk");
        }
        removed
    }

    /// Move an entity's membership from the chunk at `from` to the chunk at `to`
    pub fn relocate_entity(&self, id: EntityId, from: Position, to: Position) {
        if self.coord_of(from) == self.coord_of(to) {
            if let Some(chunk) = self.chunk_at(to) {
                chunk.invalidate();
            }
            return;
        }
        self.remove_entity(id, from);
        self.insert_entity(id, to);
    }

    pub fn insert_object(&self, object: WorldObject) {
        let chunk = self.ensure_chunk(object.position);
        let mut contents = chunk.lock();
        contents.objects.push(object);
        contents.cache.invalidate();
    }

    /// Remove an object by id from the chunk at `pos`
    pub fn remove_object(&self, id: ObjectId, pos: Position) -> Option<WorldObject> {
        let Some(chunk) = self.chunk_at(pos) else {
            debug!(area = %self.name, object_id = id, "Remove from missing chunk ignored");
            return None;
        };
        let mut contents = chunk.lock();
        let removed = contents.objects.remove_where(|o| o.id == id);
        if removed.is_some() {
            contents.cache.invalidate();
        }
        removed
    }

    /// Every object in the area
    pub fn objects(&self) -> Vec<WorldObject> {
        let chunks = self.chunks.read();
        let mut objects: Vec<WorldObject> = chunks.values().flat_map(|c| c.objects()).collect();
        objects.sort_by_key(|o| o.id);
        objects
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }

    /// Sum of entity memberships across all chunks
    pub fn entity_count(&self) -> usize {
        self.chunks.read().values().map(|c| c.entity_count()).sum()
    }

    /// Release caches unread for more than `max_idle` ticks and drop empty chunks.
    ///
    /// Returns the number of caches released.
    pub fn purge_caches(&self, tick: u64, max_idle: u64) -> usize {
        let mut chunks = self.chunks.write();
        let mut released = 0;
        chunks.retain(|_, chunk| {
            let mut contents = chunk.lock();
            if tick.saturating_sub(contents.cache.last_access) > max_idle {
                if contents.cache.is_allocated() {
                    released += 1;
                }
                contents.cache.release();
                if contents.is_empty() {
                    return false;
                }
            }
            true
        });
        released
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clear the dirty flag, returning its previous value
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}
