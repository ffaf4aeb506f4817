use crate::geometry::grid::{Grid, GridIndex};
use crate::geometry::octree_index::convert;
use crate::geometry::point::FloatingPoint;
use crate::map::hashed_blocks::HashedBlocks;
use crate::map::hashed_wavelet_octree::HashedWaveletOctree;
use crate::query::QueryAccelerator;
use crate::sdf::bucket_queue::BucketQueue;
use crate::sdf::{Occupancy, OccupancyClassifier};

const NUM_NEIGHBORS: usize = 26;

fn neighbor_index_offsets() -> [GridIndex; NUM_NEIGHBORS] {
    let mut offsets = [GridIndex::new(0, 0, 0); NUM_NEIGHBORS];
    let mut i = 0;
    for dx in -1..=1 {
        for dy in -1..=1 {
            for dz in -1..=1 {
                if dx == 0 && dy == 0 && dz == 0 {
                    continue;
                }
                offsets[i] = GridIndex::new(dx, dy, dz);
                i += 1;
            }
        }
    }
    offsets
}

fn offset_lengths(
    offsets: &[GridIndex; NUM_NEIGHBORS],
    min_cell_width: FloatingPoint,
) -> [FloatingPoint; NUM_NEIGHBORS] {
    std::array::from_fn(|i| min_cell_width * offsets[i].distance_to(GridIndex::new(0, 0, 0)))
}

/// Derives a signed distance field from an occupancy map by bucketed
/// wavefront propagation over the 26-neighborhood.
///
/// The result approximates the Euclidean distance to the nearest
/// occupied surface, positive in free space and negative inside
/// obstacles, saturated at `max_distance`.
pub struct QuasiEuclideanSdfGenerator {
    max_distance: FloatingPoint,
    classifier: OccupancyClassifier,
}

impl QuasiEuclideanSdfGenerator {
    pub fn new(max_distance: FloatingPoint) -> Self {
        QuasiEuclideanSdfGenerator {
            max_distance,
            classifier: OccupancyClassifier::default(),
        }
    }

    pub fn with_classifier(max_distance: FloatingPoint, classifier: OccupancyClassifier) -> Self {
        QuasiEuclideanSdfGenerator {
            max_distance,
            classifier,
        }
    }

    pub fn max_distance(&self) -> FloatingPoint {
        self.max_distance
    }

    pub fn generate(&self, occupancy_map: &HashedWaveletOctree) -> HashedBlocks {
        let min_cell_width = occupancy_map.min_cell_width();
        let mut sdf = HashedBlocks::new(min_cell_width, self.max_distance);

        let num_buckets = (self.max_distance / min_cell_width).ceil() as usize + 1;
        let mut open_queue = BucketQueue::new(num_buckets, self.max_distance);

        self.seed(occupancy_map, &mut sdf, &mut open_queue);
        self.propagate(occupancy_map, &mut sdf, &mut open_queue);
        sdf
    }

    /// Initializes the SDF at all free cells bordering an obstacle and
    /// queues them for propagation.
    fn seed(
        &self,
        occupancy_map: &HashedWaveletOctree,
        sdf: &mut HashedBlocks,
        open_queue: &mut BucketQueue<GridIndex>,
    ) {
        let mut occupancy = QueryAccelerator::new(occupancy_map);
        let min_cell_width = occupancy_map.min_cell_width();
        let default_value = sdf.default_value();

        occupancy_map.for_each_leaf(|node_index, node_occupancy| {
            if !self.classifier.is(node_occupancy, Occupancy::Occupied) {
                return;
            }

            // Span a highest-resolution grid that pads the (possibly
            // multi-resolution) obstacle cell by 1 voxel on all sides.
            let min_corner = convert::node_index_to_min_corner_index(node_index);
            let max_corner = convert::node_index_to_max_corner_index(node_index);
            let padded = Grid::new(
                min_corner.offset_by(GridIndex::splat(-1)),
                max_corner.offset_by(GridIndex::splat(1)),
            );

            for index in padded {
                // Cells inside the obstacle are handled by the sign flip
                // during propagation.
                let nearest_inner_index = index.clamp(min_corner, max_corner);
                if index == nearest_inner_index {
                    continue;
                }
                if !self
                    .classifier
                    .is(occupancy.get_cell_value(index), Occupancy::Free)
                {
                    continue;
                }

                let distance_to_surface =
                    0.5 * min_cell_width * index.distance_to(nearest_inner_index);
                let sdf_value = sdf.get_or_allocate_value(index);
                let sdf_uninitialized = *sdf_value == default_value;
                *sdf_value = sdf_value.min(distance_to_surface);
                if sdf_uninitialized {
                    open_queue.push(distance_to_surface, index);
                }
            }
        });
    }

    fn propagate(
        &self,
        occupancy_map: &HashedWaveletOctree,
        sdf: &mut HashedBlocks,
        open_queue: &mut BucketQueue<GridIndex>,
    ) {
        let mut occupancy = QueryAccelerator::new(occupancy_map);
        let min_cell_width = occupancy_map.min_cell_width();
        let default_value = sdf.default_value();
        let offsets = neighbor_index_offsets();
        let lengths = offset_lengths(&offsets, min_cell_width);

        while let Some(index) = open_queue.pop() {
            let sdf_value = sdf.get_cell_value(index);
            let df_value = sdf_value.abs();

            for (offset, &offset_length) in offsets.iter().zip(lengths.iter()) {
                let mut neighbor_df_candidate = df_value + offset_length;
                if self.max_distance <= neighbor_df_candidate {
                    continue;
                }

                let neighbor_index = index.offset_by(*offset);
                let neighbor_sdf = sdf.get_or_allocate_value(neighbor_index);

                // Fresh cells get their sign from the occupancy map.
                // Unknown cells are never initialized or updated.
                let neighbor_uninitialized = *neighbor_sdf == default_value;
                if neighbor_uninitialized {
                    let neighbor_occupancy = occupancy.get_cell_value(neighbor_index);
                    if self.classifier.is(neighbor_occupancy, Occupancy::Unobserved) {
                        continue;
                    }
                    if self.classifier.is(neighbor_occupancy, Occupancy::Occupied) {
                        *neighbor_sdf = -default_value;
                    }
                }

                // When the wavefront crosses the surface, the two partial
                // distances subtract instead of summing.
                let crossed_surface =
                    neighbor_sdf.is_sign_negative() != sdf_value.is_sign_negative();
                if crossed_surface {
                    if *neighbor_sdf < 0.0 {
                        neighbor_df_candidate = offset_length - df_value;
                    } else {
                        continue;
                    }
                }

                let neighbor_df = neighbor_sdf.abs().min(neighbor_df_candidate);
                *neighbor_sdf = neighbor_df.copysign(*neighbor_sdf);
                if neighbor_uninitialized {
                    open_queue.push(neighbor_df_candidate, neighbor_index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::QuasiEuclideanSdfGenerator;
    use crate::geometry::grid::{Grid, GridIndex};
    use crate::geometry::octree_index::OctreeIndex;
    use crate::map::hashed_wavelet_octree::{HashedWaveletOctree, MapConfig};
    use crate::sdf::{Occupancy, OccupancyClassifier};

    /// An occupancy map that is free in the blocks around the origin.
    fn free_map() -> HashedWaveletOctree {
        let mut map = HashedWaveletOctree::new(MapConfig {
            min_cell_width: 0.1,
            tree_height: 4,
            ..MapConfig::default()
        });
        for block in Grid::new(GridIndex::new(-1, -1, -1), GridIndex::new(1, 1, 1)) {
            map.set_cell_value(OctreeIndex::new(4, block), -1.0);
        }
        map
    }

    #[test]
    fn single_occupied_voxel_distances_along_an_axis() {
        let mut map = free_map();
        map.set_cell_value(OctreeIndex::new(0, GridIndex::new(0, 0, 0)), 2.0);

        let generator = QuasiEuclideanSdfGenerator::new(1.0);
        let sdf = generator.generate(&map);

        for k in 1..=10 {
            let expected = 0.05 + (k - 1) as f32 * 0.1;
            let actual = sdf.get_cell_value(GridIndex::new(k, 0, 0));
            assert!(
                (actual - expected).abs() <= 0.01 * expected.max(0.1),
                "sdf at ({k},0,0): expected {expected}, got {actual}"
            );
        }
        // The occupied voxel itself carries a negative distance.
        assert!(sdf.get_cell_value(GridIndex::new(0, 0, 0)) < 0.0);
        // Beyond the truncation distance the default value remains.
        assert_eq!(sdf.get_cell_value(GridIndex::new(12, 0, 0)), 1.0);
    }

    #[test]
    fn signs_match_the_occupancy_classification() {
        let mut map = free_map();
        // A 2x2x2 obstacle.
        for cell in Grid::new(GridIndex::new(0, 0, 0), GridIndex::new(1, 1, 1)) {
            map.set_cell_value(OctreeIndex::new(0, cell), 2.0);
        }

        let generator = QuasiEuclideanSdfGenerator::new(1.0);
        let sdf = generator.generate(&map);
        let classifier = OccupancyClassifier::default();

        let max_distance = generator.max_distance();
        sdf.for_each_leaf(|index, value| {
            if value.abs() >= max_distance {
                return;
            }
            let occupancy = map.get_cell_value(index.position);
            if classifier.is(occupancy, Occupancy::Free) {
                assert!(value >= 0.0, "free cell {index:?} has negative sdf {value}");
            }
            if classifier.is(occupancy, Occupancy::Occupied) {
                assert!(value <= 0.0, "occupied cell {index:?} has positive sdf {value}");
            }
        });
    }

    #[test]
    fn neighboring_cells_satisfy_the_triangle_inequality() {
        let mut map = free_map();
        map.set_cell_value(OctreeIndex::new(0, GridIndex::new(2, 1, 0)), 2.0);
        map.set_cell_value(OctreeIndex::new(0, GridIndex::new(-3, -2, 1)), 2.0);

        let generator = QuasiEuclideanSdfGenerator::new(1.0);
        let sdf = generator.generate(&map);
        let min_cell_width = 0.1;

        let mut cells = Vec::new();
        sdf.for_each_leaf(|index, value| cells.push((index.position, value)));
        let default_value = sdf.default_value();
        for &(cell, value) in &cells {
            for offset in super::neighbor_index_offsets() {
                let other = cell.offset_by(offset);
                let other_value = sdf.get_cell_value(other);
                if other_value == default_value {
                    continue;
                }
                let cell_distance = cell.distance_to(other);
                assert!(
                    (value.abs() - other_value.abs()).abs()
                        <= cell_distance * min_cell_width * 1.01 + 1e-4,
                    "triangle inequality violated between {cell:?} ({value}) and \
                     {other:?} ({other_value})"
                );
            }
        }
    }
}
