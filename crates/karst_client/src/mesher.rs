use std::sync::Arc;

use glam::IVec3;

use karst_shared::chunk::{BlockId, ChunkData};
use karst_shared::coords::{ChunkPos, FACE_NEIGHBORS, CHUNK_SIZE};

/// Renderable output of one chunk rebuild. Exclusively owned by the
/// rebuild result until the frame loop consumes it.
#[derive(Debug, Default)]
pub struct ChunkGeometry {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub block: u16,
}

impl ChunkGeometry {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

// Per-face corner offsets, matched to FACE_NEIGHBORS order.
const FACE_CORNERS: [[IVec3; 4]; 6] = [
    // +X
    [
        IVec3::new(1, 0, 0),
        IVec3::new(1, 1, 0),
        IVec3::new(1, 1, 1),
        IVec3::new(1, 0, 1),
    ],
    // -X
    [
        IVec3::new(0, 0, 1),
        IVec3::new(0, 1, 1),
        IVec3::new(0, 1, 0),
        IVec3::new(0, 0, 0),
    ],
    // +Y
    [
        IVec3::new(0, 1, 0),
        IVec3::new(0, 1, 1),
        IVec3::new(1, 1, 1),
        IVec3::new(1, 1, 0),
    ],
    // -Y
    [
        IVec3::new(0, 0, 1),
        IVec3::new(0, 0, 0),
        IVec3::new(1, 0, 0),
        IVec3::new(1, 0, 1),
    ],
    // +Z
    [
        IVec3::new(1, 0, 1),
        IVec3::new(1, 1, 1),
        IVec3::new(0, 1, 1),
        IVec3::new(0, 0, 1),
    ],
    // -Z
    [
        IVec3::new(0, 0, 0),
        IVec3::new(0, 1, 0),
        IVec3::new(1, 1, 0),
        IVec3::new(1, 0, 0),
    ],
];

fn block_at(
    center: &ChunkData,
    neighbors: &[Option<Arc<ChunkData>>; 6],
    cell: IVec3,
) -> BlockId {
    let size = CHUNK_SIZE as i32;
    let inside = |v: i32| (0..size).contains(&v);

    if inside(cell.x) && inside(cell.y) && inside(cell.z) {
        return center.get(karst_shared::coords::LocalPos {
            x: cell.x as u8,
            y: cell.y as u8,
            z: cell.z as u8,
        });
    }

    for (face, offset) in FACE_NEIGHBORS.iter().enumerate() {
        let shifted = cell - *offset * size;
        if inside(shifted.x) && inside(shifted.y) && inside(shifted.z) {
            return match &neighbors[face] {
                Some(chunk) => chunk.get(karst_shared::coords::LocalPos {
                    x: shifted.x as u8,
                    y: shifted.y as u8,
                    z: shifted.z as u8,
                }),
                // Unloaded neighbor: treat as air so the boundary face is
                // drawn rather than left as a hole once the neighbor loads.
                None => BlockId::AIR,
            };
        }
    }

    BlockId::AIR
}

/// Face-culled geometry: a face is emitted only where an opaque voxel
/// meets a non-opaque one. Boundary faces consult the neighbor snapshot,
/// which is why neighbor chunks are re-meshed when a border voxel changes.
pub fn build_chunk_geometry(
    pos: ChunkPos,
    center: &ChunkData,
    neighbors: &[Option<Arc<ChunkData>>; 6],
) -> ChunkGeometry {
    let mut geometry = ChunkGeometry::default();
    let size = CHUNK_SIZE as i32;
    let base = pos.base_world();

    for y in 0..size {
        for z in 0..size {
            for x in 0..size {
                let cell = IVec3::new(x, y, z);
                let block = block_at(center, neighbors, cell);
                if !block.is_opaque() {
                    continue;
                }

                for (face, offset) in FACE_NEIGHBORS.iter().enumerate() {
                    if block_at(center, neighbors, cell + *offset).is_opaque() {
                        continue;
                    }

                    let normal = [offset.x as f32, offset.y as f32, offset.z as f32];
                    let first = geometry.vertices.len() as u32;
                    for corner in FACE_CORNERS[face] {
                        let world = base + cell + corner;
                        geometry.vertices.push(MeshVertex {
                            position: [world.x as f32, world.y as f32, world.z as f32],
                            normal,
                            block: block.0,
                        });
                    }
                    geometry
                        .indices
                        .extend([first, first + 1, first + 2, first, first + 2, first + 3]);
                }
            }
        }
    }

    geometry
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use karst_shared::chunk::{BlockId, ChunkData};
    use karst_shared::coords::{ChunkPos, LocalPos};

    use super::build_chunk_geometry;

    const NO_NEIGHBORS: [Option<Arc<ChunkData>>; 6] = [None, None, None, None, None, None];

    #[test]
    fn empty_chunk_builds_empty_geometry() {
        let geometry = build_chunk_geometry(
            ChunkPos::new(0, 0, 0),
            &ChunkData::new_empty(),
            &NO_NEIGHBORS,
        );
        assert!(geometry.is_empty());
    }

    #[test]
    fn lone_voxel_emits_six_faces() {
        let mut chunk = ChunkData::new_empty();
        chunk.set(LocalPos { x: 5, y: 5, z: 5 }, BlockId(2));

        let geometry = build_chunk_geometry(ChunkPos::new(0, 0, 0), &chunk, &NO_NEIGHBORS);
        assert_eq!(geometry.vertices.len(), 6 * 4);
        assert_eq!(geometry.indices.len(), 6 * 6);
    }

    #[test]
    fn interior_faces_between_solid_voxels_are_culled() {
        // Two adjacent voxels share one hidden face pair: 10 faces total.
        let mut chunk = ChunkData::new_empty();
        chunk.set(LocalPos { x: 4, y: 5, z: 5 }, BlockId(2));
        chunk.set(LocalPos { x: 5, y: 5, z: 5 }, BlockId(2));

        let geometry = build_chunk_geometry(ChunkPos::new(0, 0, 0), &chunk, &NO_NEIGHBORS);
        assert_eq!(geometry.indices.len() / 6, 10);
    }

    #[test]
    fn loaded_opaque_neighbor_culls_the_boundary_face() {
        let mut chunk = ChunkData::new_empty();
        chunk.set(LocalPos { x: 15, y: 5, z: 5 }, BlockId(2));

        let open = build_chunk_geometry(ChunkPos::new(0, 0, 0), &chunk, &NO_NEIGHBORS);
        assert_eq!(open.indices.len() / 6, 6);

        let mut neighbors = NO_NEIGHBORS;
        neighbors[0] = Some(Arc::new(ChunkData::new_filled(BlockId(1)))); // +X
        let sealed = build_chunk_geometry(ChunkPos::new(0, 0, 0), &chunk, &neighbors);
        assert_eq!(sealed.indices.len() / 6, 5);
    }
}
