use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::coords::{local_to_index, LocalPos, CHUNK_VOLUME};

/// Content id of a single voxel. Id 0 is always air.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u16);

impl BlockId {
    pub const AIR: BlockId = BlockId(0);

    /// Whether a face against this block must still be emitted.
    /// Without a definition registry on the client core, everything
    /// non-air counts as opaque; translucency is a rendering concern.
    pub fn is_opaque(self) -> bool {
        self != BlockId::AIR
    }
}

#[derive(Clone, Debug)]
pub struct ChunkData {
    pub blocks: Box<[BlockId; CHUNK_VOLUME]>,
}

impl ChunkData {
    pub fn new_empty() -> Self {
        Self {
            blocks: Box::new([BlockId::AIR; CHUNK_VOLUME]),
        }
    }

    pub fn new_filled(block: BlockId) -> Self {
        Self {
            blocks: Box::new([block; CHUNK_VOLUME]),
        }
    }

    pub fn get(&self, local: LocalPos) -> BlockId {
        self.blocks[local_to_index(local)]
    }

    pub fn set(&mut self, local: LocalPos, block: BlockId) {
        let index = local_to_index(local);
        self.blocks[index] = block;
    }

    pub fn is_all_air(&self) -> bool {
        self.blocks.iter().all(|b| *b == BlockId::AIR)
    }
}

impl Default for ChunkData {
    fn default() -> Self {
        Self::new_empty()
    }
}

impl Serialize for ChunkData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.blocks.as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChunkData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let blocks = Vec::<BlockId>::deserialize(deserializer)?;
        if blocks.len() != CHUNK_VOLUME {
            return Err(de::Error::custom(format!(
                "expected {CHUNK_VOLUME} blocks, got {}",
                blocks.len()
            )));
        }

        let blocks: [BlockId; CHUNK_VOLUME] = blocks
            .try_into()
            .map_err(|_| de::Error::custom("failed to deserialize chunk block array"))?;

        Ok(Self {
            blocks: Box::new(blocks),
        })
    }
}
