use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use karst_shared::chunk::ChunkData;
use karst_shared::coords::{neighbor_offsets, ChunkPos};

use crate::mesher::{build_chunk_geometry, ChunkGeometry};
use crate::world::ChunkMap;

/// One pending rebuild. At most one of these exists per chunk position at
/// any time; later requests merge into the pending entry instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshUpdateRequest {
    pub pos: ChunkPos,
    pub ack_to_server: bool,
    pub urgent: bool,
}

/// Finished rebuild. Owns its geometry until the frame loop consumes it,
/// and holds the chunk snapshot references the job read from; dropping the
/// result is what releases them.
pub struct MeshUpdateResult {
    pub pos: ChunkPos,
    pub geometry: ChunkGeometry,
    pub chunk_refs: Vec<Arc<ChunkData>>,
    pub ack_to_server: bool,
}

#[derive(Clone, Copy)]
struct PendingFlags {
    ack_to_server: bool,
    urgent: bool,
}

struct QueueInner {
    urgent: VecDeque<ChunkPos>,
    normal: VecDeque<ChunkPos>,
    pending: FxHashMap<ChunkPos, PendingFlags>,
    stopped: bool,
}

/// Request side of the rebuild pipeline: two FIFO tiers plus a dedup map,
/// one mutex around all three so producers and workers agree on pending
/// state.
pub struct MeshUpdateQueue {
    inner: Mutex<QueueInner>,
    wake: Condvar,
}

impl MeshUpdateQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                urgent: VecDeque::new(),
                normal: VecDeque::new(),
                pending: FxHashMap::default(),
                stopped: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// Enqueues or merges. A pending entry absorbs the new flags (OR); an
    /// upgrade to urgent moves the position into the urgent tier at the
    /// tier's tail, counting as its urgent arrival.
    pub fn push(&self, pos: ChunkPos, ack_to_server: bool, urgent: bool) {
        let mut guard = self.inner.lock().expect("mesh queue poisoned");
        let inner = &mut *guard;
        if inner.stopped {
            debug!("rebuild request for {pos} after shutdown, ignored");
            return;
        }

        if let Some(entry) = inner.pending.get_mut(&pos) {
            let was_urgent = entry.urgent;
            entry.ack_to_server |= ack_to_server;
            entry.urgent |= urgent;
            if urgent && !was_urgent {
                inner.normal.retain(|queued| *queued != pos);
                inner.urgent.push_back(pos);
            }
            return;
        }

        inner.pending.insert(
            pos,
            PendingFlags {
                ack_to_server,
                urgent,
            },
        );
        if urgent {
            inner.urgent.push_back(pos);
        } else {
            inner.normal.push_back(pos);
        }
        drop(guard);
        self.wake.notify_one();
    }

    /// Takes the highest-priority pending request without blocking.
    pub fn try_pop(&self) -> Option<MeshUpdateRequest> {
        let mut inner = self.inner.lock().expect("mesh queue poisoned");
        Self::take_next(&mut inner)
    }

    /// Worker entry point: blocks until a request arrives or the queue is
    /// stopped. None means stop.
    fn pop_blocking(&self) -> Option<MeshUpdateRequest> {
        let mut inner = self.inner.lock().expect("mesh queue poisoned");
        loop {
            if inner.stopped {
                return None;
            }
            if let Some(request) = Self::take_next(&mut inner) {
                return Some(request);
            }
            inner = self.wake.wait(inner).expect("mesh queue poisoned");
        }
    }

    fn take_next(inner: &mut QueueInner) -> Option<MeshUpdateRequest> {
        let pos = inner
            .urgent
            .pop_front()
            .or_else(|| inner.normal.pop_front())?;
        let flags = inner
            .pending
            .remove(&pos)
            .expect("queued position missing from pending map");
        Some(MeshUpdateRequest {
            pos,
            ack_to_server: flags.ack_to_server,
            urgent: flags.urgent,
        })
    }

    fn stop(&self) {
        self.inner.lock().expect("mesh queue poisoned").stopped = true;
        self.wake.notify_all();
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().expect("mesh queue poisoned").pending.len()
    }
}

impl Default for MeshUpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool size: the configured value when set, otherwise all-but-one core
/// clamped to [2, 8].
pub fn resolve_worker_count(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    let available = std::thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(4);
    available.saturating_sub(1).clamp(2, 8)
}

/// Builds the geometry for one request from the current map state.
/// Returns None when the center chunk is not loaded yet: the request is
/// skipped rather than failed, and the chunk's arrival re-requests it.
pub fn build_for_request(map: &ChunkMap, request: &MeshUpdateRequest) -> Option<MeshUpdateResult> {
    let snapshot = map.snapshot(request.pos)?;
    let geometry = build_chunk_geometry(request.pos, &snapshot.center, &snapshot.neighbors);

    let mut chunk_refs = Vec::with_capacity(7);
    chunk_refs.push(snapshot.center);
    chunk_refs.extend(snapshot.neighbors.into_iter().flatten());

    Some(MeshUpdateResult {
        pos: request.pos,
        geometry,
        chunk_refs,
        ack_to_server: request.ack_to_server,
    })
}

fn worker_loop(queue: Arc<MeshUpdateQueue>, map: Arc<ChunkMap>, results: Sender<MeshUpdateResult>) {
    while let Some(request) = queue.pop_blocking() {
        match build_for_request(&map, &request) {
            Some(result) => {
                if results.send(result).is_err() {
                    // Manager gone; nothing left to deliver to.
                    return;
                }
            }
            None => debug!("chunk {} not ready for rebuild, skipping", request.pos),
        }
    }
}

/// Background geometry rebuild pool. Owns the only threads in the client;
/// everything they share with the frame loop is the request queue, the
/// result channel, and read access to the chunk map.
pub struct MeshUpdateManager {
    queue: Arc<MeshUpdateQueue>,
    results: Receiver<MeshUpdateResult>,
    workers: Vec<JoinHandle<()>>,
}

impl MeshUpdateManager {
    pub fn new(map: Arc<ChunkMap>, worker_count: usize) -> Self {
        let queue = Arc::new(MeshUpdateQueue::new());
        let (tx, rx) = mpsc::channel();

        let workers = (0..worker_count)
            .map(|index| {
                let queue = Arc::clone(&queue);
                let map = Arc::clone(&map);
                let tx = tx.clone();
                std::thread::Builder::new()
                    .name(format!("mesh-worker-{index}"))
                    .spawn(move || worker_loop(queue, map, tx))
                    .expect("failed to spawn mesh worker thread")
            })
            .collect();

        Self {
            queue,
            results: rx,
            workers,
        }
    }

    pub fn add(&self, pos: ChunkPos, ack_to_server: bool, urgent: bool) {
        self.queue.push(pos, ack_to_server, urgent);
    }

    /// Requests the chunk plus its 26 neighbors. Boundary faces depend on
    /// adjacent contents, but only the chunk that actually changed needs
    /// low-latency treatment or a server acknowledgement.
    pub fn add_with_neighbors(&self, pos: ChunkPos, ack_to_server: bool, urgent: bool) {
        self.add(pos, ack_to_server, urgent);
        for offset in neighbor_offsets() {
            self.add(pos.offset(offset.x, offset.y, offset.z), false, false);
        }
    }

    /// Nonblocking; at most one result per call. The frame loop calls
    /// this until empty once per frame.
    pub fn next_result(&self) -> Option<MeshUpdateResult> {
        self.results.try_recv().ok()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Cooperative stop: flag, wake, join, then an explicit drain so any
    /// result still queued releases its geometry and chunk references.
    /// Returns how many leftover results were drained.
    pub fn shutdown(&mut self) -> usize {
        self.queue.stop();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("mesh worker panicked during shutdown");
            }
        }

        let mut drained = 0;
        while let Ok(result) = self.results.try_recv() {
            drop(result);
            drained += 1;
        }
        if drained > 0 {
            debug!("released {drained} undelivered mesh result(s) at shutdown");
        }
        drained
    }

    #[cfg(test)]
    fn queue(&self) -> &MeshUpdateQueue {
        &self.queue
    }
}

impl Drop for MeshUpdateManager {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}
