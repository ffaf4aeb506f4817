use crate::geometry::grid::GridIndex;
use crate::geometry::octree_index::convert;
use crate::geometry::point::{FloatingPoint, Point3D};
use crate::map::block::WaveletBlock;
use crate::map::hashed_wavelet_octree::HashedWaveletOctree;
use crate::map::variant::Map;

/// Repeated cell lookups with a one-entry block cache.
///
/// Wavefront algorithms query long runs of cells within the same block;
/// memoizing the last block skips the hash lookup for those runs.
pub struct QueryAccelerator<'a> {
    map: &'a HashedWaveletOctree,
    cached: Option<(GridIndex, Option<&'a WaveletBlock>)>,
}

impl<'a> QueryAccelerator<'a> {
    pub fn new(map: &'a HashedWaveletOctree) -> Self {
        QueryAccelerator { map, cached: None }
    }

    pub fn get_cell_value(&mut self, cell_index: GridIndex) -> FloatingPoint {
        let tree_height = self.map.tree_height();
        let block_index = GridIndex::new(
            cell_index.x >> tree_height,
            cell_index.y >> tree_height,
            cell_index.z >> tree_height,
        );
        let block = match self.cached {
            Some((cached_index, block)) if cached_index == block_index => block,
            _ => {
                let block = self.map.get_block(block_index);
                self.cached = Some((block_index, block));
                block
            }
        };
        let Some(block) = block else {
            return self.map.default_value();
        };
        let mask = (1 << tree_height) - 1;
        let local = GridIndex::new(cell_index.x & mask, cell_index.y & mask, cell_index.z & mask);
        block.value_at(local, tree_height).clamp(
            self.map.config().min_log_odds,
            self.map.config().max_log_odds,
        )
    }
}

/// The value of the cell whose center is closest to the query position.
pub fn interpolate_nearest(map: &Map, position: &Point3D) -> FloatingPoint {
    let cell_width_inv = 1.0 / map.min_cell_width();
    map.get_cell_value(convert::point_to_nearest_index(position, cell_width_inv))
}

/// Trilinear interpolation over the 8 cell centers surrounding the
/// query position.
pub fn interpolate_trilinear(map: &Map, position: &Point3D) -> FloatingPoint {
    let cell_width = map.min_cell_width();
    let cell_width_inv = 1.0 / cell_width;

    // The cell whose center is the largest one not exceeding the query
    // position, per axis.
    let min_corner_index = GridIndex::new(
        (position.x * cell_width_inv - 0.5).floor() as i32,
        (position.y * cell_width_inv - 0.5).floor() as i32,
        (position.z * cell_width_inv - 0.5).floor() as i32,
    );
    let min_corner_center = convert::index_to_center_point(min_corner_index, cell_width);

    let a = (position - min_corner_center) * cell_width_inv;
    debug_assert!((-1e-4..=1.0 + 1e-4).contains(&a.x));
    debug_assert!((-1e-4..=1.0 + 1e-4).contains(&a.y));
    debug_assert!((-1e-4..=1.0 + 1e-4).contains(&a.z));

    let mut cube_corners = [0.0; 8];
    for (corner_index, corner_value) in cube_corners.iter_mut().enumerate() {
        let offset = GridIndex::new(
            (corner_index & 0b001) as i32,
            ((corner_index >> 1) & 1) as i32,
            ((corner_index >> 2) & 1) as i32,
        );
        *corner_value = map.get_cell_value(min_corner_index.offset_by(offset));
    }

    // Collapse one dimension at a time.
    let mut plane_corners = [0.0; 4];
    for (side, plane_value) in plane_corners.iter_mut().enumerate() {
        *plane_value = (1.0 - a.x) * cube_corners[side * 2] + a.x * cube_corners[side * 2 + 1];
    }
    let line_0 = (1.0 - a.y) * plane_corners[0] + a.y * plane_corners[1];
    let line_1 = (1.0 - a.y) * plane_corners[2] + a.y * plane_corners[3];
    (1.0 - a.z) * line_0 + a.z * line_1
}
