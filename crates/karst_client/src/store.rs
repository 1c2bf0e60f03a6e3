use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use karst_shared::chunk::ChunkData;
use karst_shared::coords::ChunkPos;

const CHUNK_DIR: &str = "chunks";
const LEGACY_FILE: &str = "chunks.dat";

/// On-disk spill cache for received chunks: one lz4-compressed bincode
/// file per chunk. Purely local convenience; the server remains the
/// source of truth.
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    /// Opens (and if needed creates) the cache directory, running the
    /// one-time legacy migration first. A migration failure is a hard
    /// error: continuing against a half-migrated cache corrupts it.
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir.join(CHUNK_DIR))?;
        migrate_legacy(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn chunk_path(&self, pos: ChunkPos) -> PathBuf {
        self.dir
            .join(CHUNK_DIR)
            .join(format!("{}_{}_{}.kc", pos.x, pos.y, pos.z))
    }

    pub fn save_chunk(&self, pos: ChunkPos, chunk: &ChunkData) -> io::Result<()> {
        let encoded = bincode::serialize(chunk)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);
        fs::write(self.chunk_path(pos), compressed)
    }

    pub fn load_chunk(&self, pos: ChunkPos) -> io::Result<Option<ChunkData>> {
        let raw = match fs::read(self.chunk_path(pos)) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let decompressed = lz4_flex::decompress_size_prepended(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let chunk = bincode::deserialize(&decompressed)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(chunk))
    }

    /// Best-effort bulk save; individual failures are logged, not fatal.
    /// Returns how many chunks were written.
    pub fn save_many<'a>(
        &self,
        chunks: impl Iterator<Item = (ChunkPos, &'a ChunkData)>,
    ) -> usize {
        let mut written = 0;
        for (pos, chunk) in chunks {
            match self.save_chunk(pos, chunk) {
                Ok(()) => written += 1,
                Err(err) => warn!("failed caching chunk {pos}: {err}"),
            }
        }
        written
    }
}

/// Moves a legacy single-file cache (one bincode blob of every chunk) into
/// the per-chunk layout. Every step must succeed or the whole open fails.
fn migrate_legacy(dir: &Path) -> io::Result<()> {
    let legacy = dir.join(LEGACY_FILE);
    if !legacy.exists() {
        return Ok(());
    }

    info!("Migrating legacy chunk cache at {}", legacy.display());
    let raw = fs::read(&legacy)?;
    let entries: Vec<(ChunkPos, ChunkData)> = bincode::deserialize(&raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let store = ChunkStore {
        dir: dir.to_path_buf(),
    };
    for (pos, chunk) in &entries {
        store.save_chunk(*pos, chunk)?;
    }

    // The rename is the commit point; without it the migration would rerun
    // over freshly written files forever.
    fs::rename(&legacy, legacy.with_extension("dat.bak"))?;
    info!("Migrated {} cached chunk(s)", entries.len());
    Ok(())
}
