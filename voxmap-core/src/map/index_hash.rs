use std::hash::{BuildHasher, Hasher};

// NOTE: The coordinate mixing constants come from K. Museth, "VDB:
//       High-resolution sparse volumes with dynamic topology",
//       ACM Trans. Graph., 2013.
const COORDINATE_PRIMES: [u64; 3] = [73856093, 19349663, 83492791];

/// Hasher for 3d block indices.
///
/// Each written i32 is multiplied with its own large prime and xor-folded
/// into the state, which spreads axis aligned walks across the whole hash
/// range instead of clustering them in neighboring buckets.
#[derive(Clone, Default)]
pub struct IndexHasher {
    state: u64,
    coordinate: usize,
}

impl Hasher for IndexHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        // Fallback for non-index keys; the map keys only use write_i32.
        for &byte in bytes {
            self.state = self.state.rotate_left(8) ^ byte as u64;
        }
    }

    #[inline]
    fn write_i32(&mut self, value: i32) {
        let prime = COORDINATE_PRIMES[self.coordinate % COORDINATE_PRIMES.len()];
        self.coordinate += 1;
        self.state ^= (value as i64 as u64).wrapping_mul(prime);
    }
}

/// [BuildHasher] plugging [IndexHasher] into std's `HashMap`.
#[derive(Clone, Copy, Debug, Default)]
pub struct IndexHash;

impl BuildHasher for IndexHash {
    type Hasher = IndexHasher;

    fn build_hasher(&self) -> IndexHasher {
        IndexHasher::default()
    }
}

#[cfg(test)]
mod tests {
    use super::IndexHash;
    use crate::geometry::grid::GridIndex;
    use std::collections::HashSet;
    use std::hash::{BuildHasher, Hash, Hasher};

    fn hash_of(index: GridIndex) -> u64 {
        let mut hasher = IndexHash.build_hasher();
        index.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn axis_aligned_walks_do_not_collide() {
        for axis in 0..3 {
            let mut seen = HashSet::new();
            for i in -1000..1000 {
                let index = match axis {
                    0 => GridIndex::new(i, 0, 0),
                    1 => GridIndex::new(0, i, 0),
                    _ => GridIndex::new(0, 0, i),
                };
                assert!(
                    seen.insert(hash_of(index)),
                    "hash collision on axis {axis} walk at {i}"
                );
            }
        }
    }

    #[test]
    fn dense_grid_has_few_collisions() {
        let mut seen = HashSet::new();
        let mut total = 0;
        for x in -8..8 {
            for y in -8..8 {
                for z in -8..8 {
                    seen.insert(hash_of(GridIndex::new(x, y, z)));
                    total += 1;
                }
            }
        }
        assert!(seen.len() as f64 > 0.999 * total as f64);
    }
}
