use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use glam::IVec3;
use serde::{Deserialize, Serialize};

pub const CHUNK_SIZE: usize = 16;
pub const CHUNK_VOLUME: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;

/// Integer coordinate of a chunk in the chunk grid.
///
/// Components must stay within i16 range so the position can travel in
/// acknowledgement packets (v3s16 on the wire).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalPos {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}

impl ChunkPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// World-space position of this chunk's minimum corner.
    pub fn base_world(self) -> IVec3 {
        let size = CHUNK_SIZE as i32;
        IVec3::new(self.x * size, self.y * size, self.z * size)
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

impl Add for ChunkPos {
    type Output = ChunkPos;

    fn add(self, rhs: Self) -> Self::Output {
        self.offset(rhs.x, rhs.y, rhs.z)
    }
}

impl AddAssign for ChunkPos {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ChunkPos {
    type Output = ChunkPos;

    fn sub(self, rhs: Self) -> Self::Output {
        self.offset(-rhs.x, -rhs.y, -rhs.z)
    }
}

impl SubAssign for ChunkPos {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

/// Offsets of the 26 chunks surrounding a center chunk, excluding the
/// center itself. Boundary faces of a chunk depend on adjacent chunk
/// contents, so an edit near a border dirties up to all of these.
pub fn neighbor_offsets() -> impl Iterator<Item = IVec3> {
    (-1..=1).flat_map(move |y| {
        (-1..=1).flat_map(move |x| {
            (-1..=1).filter_map(move |z| {
                if x == 0 && y == 0 && z == 0 {
                    None
                } else {
                    Some(IVec3::new(x, y, z))
                }
            })
        })
    })
}

/// The six face-adjacent neighbor offsets, in +X, -X, +Y, -Y, +Z, -Z order.
pub const FACE_NEIGHBORS: [IVec3; 6] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

fn div_rem_floor(value: i32, divisor: i32) -> (i32, i32) {
    let mut q = value / divisor;
    let mut r = value % divisor;
    if r < 0 {
        q -= 1;
        r += divisor;
    }
    (q, r)
}

pub fn world_to_chunk(world_pos: IVec3) -> (ChunkPos, LocalPos) {
    let size = CHUNK_SIZE as i32;

    let (chunk_x, local_x) = div_rem_floor(world_pos.x, size);
    let (chunk_y, local_y) = div_rem_floor(world_pos.y, size);
    let (chunk_z, local_z) = div_rem_floor(world_pos.z, size);

    (
        ChunkPos::new(chunk_x, chunk_y, chunk_z),
        LocalPos {
            x: local_x as u8,
            y: local_y as u8,
            z: local_z as u8,
        },
    )
}

pub fn chunk_to_world(chunk_pos: ChunkPos, local: LocalPos) -> IVec3 {
    chunk_pos.base_world()
        + IVec3::new(
            i32::from(local.x),
            i32::from(local.y),
            i32::from(local.z),
        )
}

pub fn local_to_index(local: LocalPos) -> usize {
    usize::from(local.x)
        + usize::from(local.z) * CHUNK_SIZE
        + usize::from(local.y) * CHUNK_SIZE * CHUNK_SIZE
}

pub fn index_to_local(index: usize) -> LocalPos {
    assert!(index < CHUNK_VOLUME, "chunk index out of bounds: {index}");

    let y = index / (CHUNK_SIZE * CHUNK_SIZE);
    let rem = index % (CHUNK_SIZE * CHUNK_SIZE);
    let z = rem / CHUNK_SIZE;
    let x = rem % CHUNK_SIZE;

    LocalPos {
        x: x as u8,
        y: y as u8,
        z: z as u8,
    }
}

#[cfg(test)]
mod tests {
    use glam::IVec3;

    use super::{
        chunk_to_world, index_to_local, local_to_index, neighbor_offsets, world_to_chunk,
        ChunkPos, LocalPos, CHUNK_SIZE,
    };

    #[test]
    fn local_index_round_trips_for_every_cell() {
        for y in 0..CHUNK_SIZE {
            for z in 0..CHUNK_SIZE {
                for x in 0..CHUNK_SIZE {
                    let local = LocalPos {
                        x: x as u8,
                        y: y as u8,
                        z: z as u8,
                    };
                    assert_eq!(index_to_local(local_to_index(local)), local);
                }
            }
        }
    }

    #[test]
    fn world_to_chunk_floors_negative_coordinates() {
        let (chunk, local) = world_to_chunk(IVec3::new(-1, -1, -1));
        assert_eq!(chunk, ChunkPos::new(-1, -1, -1));
        assert_eq!(
            local,
            LocalPos {
                x: (CHUNK_SIZE - 1) as u8,
                y: (CHUNK_SIZE - 1) as u8,
                z: (CHUNK_SIZE - 1) as u8,
            }
        );

        let world = IVec3::new(-33, 95, 66);
        let (chunk, local) = world_to_chunk(world);
        assert_eq!(chunk_to_world(chunk, local), world);
    }

    #[test]
    fn neighbor_offsets_cover_26_distinct_cells() {
        let offsets: Vec<IVec3> = neighbor_offsets().collect();
        assert_eq!(offsets.len(), 26);
        assert!(!offsets.contains(&IVec3::ZERO));
        for (i, a) in offsets.iter().enumerate() {
            for b in &offsets[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn chunk_pos_arithmetic_is_component_wise() {
        let a = ChunkPos::new(10, -2, 4);
        let b = ChunkPos::new(-3, 8, 1);

        assert_eq!(a + b, ChunkPos::new(7, 6, 5));
        assert_eq!(a - b, ChunkPos::new(13, -10, 3));

        let mut c = a;
        c += b;
        assert_eq!(c, ChunkPos::new(7, 6, 5));
        c -= b;
        assert_eq!(c, a);
    }
}
