use std::f32::consts::PI;

use tracing::info;

use karst_shared::coords::ChunkPos;

/// How often eviction runs, in seconds.
pub const ENFORCE_PERIOD: f32 = 5.25;

/// View range beyond this no longer grows the cap estimate.
pub const ENFORCE_DISTANCE: i32 = 200;

/// Wire limit: the acknowledgement packet's count field is one byte.
pub const MAX_ACK_BATCH: usize = 255;

/// Periodic driver for chunk eviction. Owns only its timer and the
/// log-once bookkeeping for a raised cap.
pub struct BlockUnloadEnforcer {
    timer: f32,
    logged_cap: usize,
}

impl BlockUnloadEnforcer {
    pub fn new() -> Self {
        Self {
            timer: ENFORCE_PERIOD,
            logged_cap: 0,
        }
    }

    /// Counts down; true when an enforcement pass is due this frame.
    pub fn tick(&mut self, dt: f32) -> bool {
        self.timer -= dt;
        if self.timer <= 0.0 {
            self.timer = ENFORCE_PERIOD;
            true
        } else {
            false
        }
    }

    /// Resolves the cap for this pass, logging when the view-range
    /// estimate raises it above the configured value (once per raise).
    pub fn resolve_cap(&mut self, configured_limit: i32, view_range: i32, chunk_size: f32) -> Option<usize> {
        let cap = dynamic_chunk_cap(configured_limit, view_range, chunk_size)?;
        if cap > configured_limit.max(0) as usize && cap > self.logged_cap {
            info!(
                "using chunk limit of {cap} rather than configured {configured_limit} due to view range"
            );
            self.logged_cap = cap;
        }
        Some(cap)
    }
}

impl Default for BlockUnloadEnforcer {
    fn default() -> Self {
        Self::new()
    }
}

/// Sphere-volume estimate of how many chunks a full 360° view needs: the
/// client must be able to keep everything in view range cached, so the
/// estimate may raise the configured floor but never lower it. A negative
/// configured limit disables the cap.
pub fn dynamic_chunk_cap(configured_limit: i32, view_range: i32, chunk_size: f32) -> Option<usize> {
    if configured_limit < 0 {
        return None;
    }

    let radius = (ENFORCE_DISTANCE.min(view_range) as f32 / chunk_size).ceil();
    let estimate = (4.0 / 3.0) * PI * radius.powi(3);
    Some((estimate as usize).max(configured_limit as usize))
}

/// Splits evicted coordinates into acknowledgement-sized groups.
pub fn ack_batches(positions: &[ChunkPos]) -> impl Iterator<Item = &[ChunkPos]> {
    positions.chunks(MAX_ACK_BATCH)
}
