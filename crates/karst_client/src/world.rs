use std::sync::{Arc, RwLock};

use glam::IVec3;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use karst_shared::chunk::{BlockId, ChunkData};
use karst_shared::coords::{world_to_chunk, ChunkPos, FACE_NEIGHBORS, CHUNK_SIZE};

use crate::mesher::ChunkGeometry;

/// Decoded chunk contents keyed by position. The frame loop is the only
/// writer; geometry workers take the read lock just long enough to clone
/// `Arc` handles for a rebuild snapshot.
#[derive(Default)]
pub struct ChunkMap {
    chunks: RwLock<FxHashMap<ChunkPos, Arc<ChunkData>>>,
}

/// The inputs one rebuild job works from: the center chunk plus its six
/// face neighbors, in `FACE_NEIGHBORS` order. Holding the `Arc`s keeps the
/// voxel data alive for as long as the job (and then its result) exists,
/// however the map changes underneath.
pub struct ChunkSnapshot {
    pub center: Arc<ChunkData>,
    pub neighbors: [Option<Arc<ChunkData>>; 6],
}

impl ChunkMap {
    pub fn insert(&self, pos: ChunkPos, data: Arc<ChunkData>) {
        self.chunks.write().expect("chunk map poisoned").insert(pos, data);
    }

    pub fn remove(&self, pos: ChunkPos) -> Option<Arc<ChunkData>> {
        self.chunks.write().expect("chunk map poisoned").remove(&pos)
    }

    pub fn get(&self, pos: ChunkPos) -> Option<Arc<ChunkData>> {
        self.chunks.read().expect("chunk map poisoned").get(&pos).cloned()
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.chunks.read().expect("chunk map poisoned").contains_key(&pos)
    }

    pub fn len(&self) -> usize {
        self.chunks.read().expect("chunk map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Edits one voxel in place. Copy-on-write: if a rebuild job still
    /// holds the old data, it keeps its consistent view and the map gets a
    /// fresh copy.
    pub fn set_block(&self, world_pos: IVec3, block: BlockId) -> Option<ChunkPos> {
        let (chunk_pos, local) = world_to_chunk(world_pos);
        let mut chunks = self.chunks.write().expect("chunk map poisoned");
        let entry = chunks.get_mut(&chunk_pos)?;
        Arc::make_mut(entry).set(local, block);
        Some(chunk_pos)
    }

    /// Gathers the rebuild inputs for `pos` under a single read lock, so a
    /// job never sees a half-applied frame of map mutations. Returns None
    /// when the center chunk is not loaded.
    pub fn snapshot(&self, pos: ChunkPos) -> Option<ChunkSnapshot> {
        let chunks = self.chunks.read().expect("chunk map poisoned");
        let center = chunks.get(&pos)?.clone();
        let neighbors = FACE_NEIGHBORS
            .map(|offset| chunks.get(&pos.offset(offset.x, offset.y, offset.z)).cloned());
        Some(ChunkSnapshot { center, neighbors })
    }
}

/// Frame-side view of the world: the shared chunk map plus bookkeeping
/// only the frame loop touches (usage ages, the renderable geometry
/// cache).
pub struct ClientWorld {
    map: Arc<ChunkMap>,
    last_used: FxHashMap<ChunkPos, f64>,
    geometry: FxHashMap<ChunkPos, ChunkGeometry>,
    dirty: FxHashSet<ChunkPos>,
    clock: f64,
}

impl ClientWorld {
    pub fn new() -> Self {
        Self {
            map: Arc::new(ChunkMap::default()),
            last_used: FxHashMap::default(),
            geometry: FxHashMap::default(),
            dirty: FxHashSet::default(),
            clock: 0.0,
        }
    }

    /// Shared handle for the mesh update manager's workers.
    pub fn map(&self) -> Arc<ChunkMap> {
        Arc::clone(&self.map)
    }

    pub fn advance_clock(&mut self, dt: f32) {
        self.clock += f64::from(dt);
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn chunk_count(&self) -> usize {
        self.map.len()
    }

    pub fn set_chunk(&mut self, pos: ChunkPos, data: ChunkData) {
        self.map.insert(pos, Arc::new(data));
        self.last_used.insert(pos, self.clock);
        self.dirty.insert(pos);
    }

    pub fn get_chunk(&mut self, pos: ChunkPos) -> Option<Arc<ChunkData>> {
        let found = self.map.get(pos);
        if found.is_some() {
            self.last_used.insert(pos, self.clock);
        }
        found
    }

    /// Read without refreshing the usage age; cache flushing must not
    /// keep chunks alive.
    pub fn peek_chunk(&self, pos: ChunkPos) -> Option<Arc<ChunkData>> {
        self.map.get(pos)
    }

    pub fn set_block(&mut self, world_pos: IVec3, block: BlockId) -> Option<ChunkPos> {
        let touched = self.map.set_block(world_pos, block)?;
        self.last_used.insert(touched, self.clock);
        self.dirty.insert(touched);
        Some(touched)
    }

    pub fn remove_chunk(&mut self, pos: ChunkPos) {
        self.map.remove(pos);
        self.last_used.remove(&pos);
        self.geometry.remove(&pos);
        self.dirty.remove(&pos);
    }

    /// Chunks changed since the last cache flush, drained on read.
    pub fn take_dirty(&mut self) -> Vec<ChunkPos> {
        self.dirty.drain().collect()
    }

    pub fn store_geometry(&mut self, pos: ChunkPos, geometry: ChunkGeometry) {
        // Geometry for a chunk evicted while its rebuild was in flight is
        // stale; drop it instead of resurrecting the cache entry.
        if self.map.contains(pos) {
            self.geometry.insert(pos, geometry);
        } else {
            debug!("discarding geometry for unloaded chunk {pos}");
        }
    }

    pub fn geometry_count(&self) -> usize {
        self.geometry.len()
    }

    pub fn geometry_for(&self, pos: ChunkPos) -> Option<&ChunkGeometry> {
        self.geometry.get(&pos)
    }

    /// Evicts chunks unused for longer than `timeout` seconds, then keeps
    /// evicting oldest-first while the store exceeds `cap`. Returns what
    /// was dropped so the caller can acknowledge it to the server.
    pub fn evict_unused(&mut self, timeout: f32, cap: Option<usize>) -> Vec<ChunkPos> {
        let mut by_age: Vec<(ChunkPos, f64)> =
            self.last_used.iter().map(|(pos, t)| (*pos, *t)).collect();
        by_age.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let total = by_age.len();
        let mut evicted = Vec::new();
        for (pos, used) in by_age {
            let expired = self.clock - used >= f64::from(timeout);
            let over_cap = cap.is_some_and(|cap| total - evicted.len() > cap);
            if !(expired || over_cap) {
                break;
            }
            self.remove_chunk(pos);
            evicted.push(pos);
        }
        evicted
    }

    /// Estimated world-units distance covered per chunk, for cap math.
    pub fn chunk_size() -> f32 {
        CHUNK_SIZE as f32
    }
}

impl Default for ClientWorld {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::IVec3;

    use karst_shared::chunk::{BlockId, ChunkData};
    use karst_shared::coords::ChunkPos;

    use super::ClientWorld;
    use crate::mesher::ChunkGeometry;

    #[test]
    fn snapshot_holds_data_alive_across_removal() {
        let mut world = ClientWorld::new();
        let pos = ChunkPos::new(0, 0, 0);
        world.set_chunk(pos, ChunkData::new_filled(BlockId(1)));

        let map = world.map();
        let snapshot = map.snapshot(pos).expect("center chunk loaded");
        world.remove_chunk(pos);

        // The map no longer knows the chunk but the snapshot still reads it.
        assert!(map.get(pos).is_none());
        assert_eq!(snapshot.center.get(Default::default()), BlockId(1));
    }

    #[test]
    fn snapshot_requires_the_center_chunk() {
        let world = ClientWorld::new();
        assert!(world.map().snapshot(ChunkPos::new(5, 5, 5)).is_none());
    }

    #[test]
    fn set_block_copies_when_a_snapshot_is_outstanding() {
        let mut world = ClientWorld::new();
        let pos = ChunkPos::new(0, 0, 0);
        world.set_chunk(pos, ChunkData::new_empty());

        let snapshot = world.map().snapshot(pos).unwrap();
        let held = Arc::clone(&snapshot.center);

        world.set_block(IVec3::new(1, 2, 3), BlockId(9));

        // The held snapshot is unchanged; the map sees the edit.
        assert!(held.is_all_air());
        let fresh = world.get_chunk(pos).unwrap();
        assert!(!fresh.is_all_air());
    }

    #[test]
    fn eviction_honors_timeout_then_cap() {
        let mut world = ClientWorld::new();
        for i in 0..6 {
            world.set_chunk(ChunkPos::new(i, 0, 0), ChunkData::new_empty());
            world.advance_clock(10.0);
        }

        // Chunks 0 and 1 are 60 s and 50 s old; timeout 45 s expires both.
        let evicted = world.evict_unused(45.0, None);
        assert_eq!(evicted, vec![ChunkPos::new(0, 0, 0), ChunkPos::new(1, 0, 0)]);
        assert_eq!(world.chunk_count(), 4);

        // Cap of 2 forces out the two oldest survivors regardless of age.
        let evicted = world.evict_unused(1000.0, Some(2));
        assert_eq!(evicted.len(), 2);
        assert_eq!(world.chunk_count(), 2);
    }

    #[test]
    fn stale_geometry_for_unloaded_chunks_is_discarded() {
        let mut world = ClientWorld::new();
        let pos = ChunkPos::new(3, 0, 0);
        world.store_geometry(pos, ChunkGeometry::default());
        assert_eq!(world.geometry_count(), 0);

        world.set_chunk(pos, ChunkData::new_empty());
        world.store_geometry(pos, ChunkGeometry::default());
        assert_eq!(world.geometry_count(), 1);

        world.remove_chunk(pos);
        assert_eq!(world.geometry_count(), 0);
    }
}
