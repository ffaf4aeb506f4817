use crate::geometry::grid::GridIndex;
use crate::geometry::octree_index::OctreeIndex;
use crate::geometry::point::{FloatingPoint, IndexElement};
use crate::map::block::WaveletBlock;
use crate::map::index_hash::IndexHash;
use crate::utils::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Geometry and value bounds shared by all map variants.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Side length of a leaf cell, in meters.
    pub min_cell_width: FloatingPoint,
    pub min_log_odds: FloatingPoint,
    pub max_log_odds: FloatingPoint,
    /// Height of the block roots. Blocks hold `2^tree_height` cells per side.
    pub tree_height: IndexElement,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            min_cell_width: 0.1,
            min_log_odds: -2.0,
            max_log_odds: 4.0,
            tree_height: 6,
        }
    }
}

impl MapConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_cell_width > 0.0) {
            return Err(ConfigError("min_cell_width must be > 0".to_string()));
        }
        if self.min_log_odds >= self.max_log_odds {
            return Err(ConfigError(
                "min_log_odds must be smaller than max_log_odds".to_string(),
            ));
        }
        if !(1..=16).contains(&self.tree_height) {
            return Err(ConfigError("tree_height must be in 1..=16".to_string()));
        }
        Ok(())
    }
}

/// Sparse occupancy map: a hash map from block indices to
/// wavelet-compressed octree blocks.
///
/// Missing blocks represent fully unknown space (log odds 0).
#[derive(Clone, Debug, Default)]
pub struct HashedWaveletOctree {
    config: MapConfig,
    blocks: HashMap<GridIndex, WaveletBlock, IndexHash>,
}

impl HashedWaveletOctree {
    pub fn new(config: MapConfig) -> Self {
        HashedWaveletOctree {
            config,
            blocks: HashMap::default(),
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    #[inline]
    pub fn min_cell_width(&self) -> FloatingPoint {
        self.config.min_cell_width
    }

    #[inline]
    pub fn tree_height(&self) -> IndexElement {
        self.config.tree_height
    }

    /// Number of leaf cells per block side.
    #[inline]
    pub fn cells_per_block_side(&self) -> IndexElement {
        1 << self.config.tree_height
    }

    /// The value of cells that have never been observed.
    #[inline]
    pub fn default_value(&self) -> FloatingPoint {
        0.0
    }

    pub fn empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get_block(&self, block_index: GridIndex) -> Option<&WaveletBlock> {
        self.blocks.get(&block_index)
    }

    pub fn get_block_mut(&mut self, block_index: GridIndex) -> Option<&mut WaveletBlock> {
        self.blocks.get_mut(&block_index)
    }

    pub fn get_or_allocate_block(&mut self, block_index: GridIndex) -> &mut WaveletBlock {
        self.blocks.entry(block_index).or_default()
    }

    pub fn blocks(&self) -> impl Iterator<Item = (GridIndex, &WaveletBlock)> {
        self.blocks.iter().map(|(index, block)| (*index, block))
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = (GridIndex, &mut WaveletBlock)> {
        self.blocks.iter_mut().map(|(index, block)| (*index, block))
    }

    /// Removes every block for which the predicate returns true.
    pub fn erase_block_if(
        &mut self,
        mut predicate: impl FnMut(GridIndex, &WaveletBlock) -> bool,
    ) {
        self.blocks.retain(|index, block| !predicate(*index, block));
    }

    /// Reconstructs the value of the given leaf cell,
    /// clamped to the configured log odds bounds.
    pub fn get_cell_value(&self, leaf_index: GridIndex) -> FloatingPoint {
        let tree_height = self.config.tree_height;
        let block_index = GridIndex::new(
            leaf_index.x >> tree_height,
            leaf_index.y >> tree_height,
            leaf_index.z >> tree_height,
        );
        let Some(block) = self.blocks.get(&block_index) else {
            return self.default_value();
        };
        let mask = (1 << tree_height) - 1;
        let local = GridIndex::new(leaf_index.x & mask, leaf_index.y & mask, leaf_index.z & mask);
        block
            .value_at(local, tree_height)
            .clamp(self.config.min_log_odds, self.config.max_log_odds)
    }

    /// Sets the value of the node at the given index, allocating its block
    /// if necessary and discarding any finer detail below the node.
    pub fn set_cell_value(&mut self, index: OctreeIndex, value: FloatingPoint) {
        let tree_height = self.config.tree_height;
        debug_assert!((0..=tree_height).contains(&index.height));
        let shift = tree_height - index.height;
        let block_index = GridIndex::new(
            index.position.x >> shift,
            index.position.y >> shift,
            index.position.z >> shift,
        );
        let mask = (1 << shift) - 1;
        let local = OctreeIndex::new(
            index.height,
            GridIndex::new(
                index.position.x & mask,
                index.position.y & mask,
                index.position.z & mask,
            ),
        );
        self.get_or_allocate_block(block_index)
            .set_value_at(local, tree_height, value);
    }

    /// Calls the visitor for every leaf in the map.
    ///
    /// Leaves are the deepest stored nodes of each block, so a single call
    /// can cover many cells at once. Visit order is unspecified.
    pub fn for_each_leaf(&self, mut visitor: impl FnMut(OctreeIndex, FloatingPoint)) {
        let MapConfig {
            min_log_odds,
            max_log_odds,
            tree_height,
            ..
        } = self.config;
        for (block_index, block) in &self.blocks {
            block.for_each_leaf(
                OctreeIndex::new(tree_height, *block_index),
                min_log_odds,
                max_log_odds,
                &mut visitor,
            );
        }
    }

    /// Thresholds and prunes all blocks, and drops blocks that hold
    /// nothing but the default value.
    pub fn prune(&mut self) {
        let MapConfig {
            min_log_odds,
            max_log_odds,
            ..
        } = self.config;
        self.blocks.retain(|_, block| {
            block.prune(min_log_odds, max_log_odds);
            !block.is_default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{HashedWaveletOctree, MapConfig};
    use crate::geometry::grid::GridIndex;
    use crate::geometry::octree_index::OctreeIndex;

    fn test_map() -> HashedWaveletOctree {
        HashedWaveletOctree::new(MapConfig {
            min_cell_width: 0.1,
            min_log_odds: -2.0,
            max_log_odds: 4.0,
            tree_height: 4,
        })
    }

    #[test]
    fn get_set_across_blocks() {
        let mut map = test_map();
        let cells = [
            GridIndex::new(0, 0, 0),
            GridIndex::new(15, 15, 15),
            GridIndex::new(16, 0, 0),
            GridIndex::new(-1, -1, -1),
            GridIndex::new(-17, 3, 100),
        ];
        for (i, &cell) in cells.iter().enumerate() {
            map.set_cell_value(OctreeIndex::new(0, cell), i as f32 * 0.5 - 1.0);
        }
        for (i, &cell) in cells.iter().enumerate() {
            let expected = i as f32 * 0.5 - 1.0;
            assert!(
                (map.get_cell_value(cell) - expected).abs() < 1e-5,
                "wrong value at {cell:?}"
            );
        }
        // Cells in blocks (0,0,0), (1,0,0), (-1,-1,-1) and (-2,0,6).
        assert_eq!(map.len(), 4);
        assert!(map.get_cell_value(GridIndex::new(100, 100, 100)).abs() < 1e-6);
    }

    #[test]
    fn unknown_cells_read_back_as_default() {
        let map = test_map();
        assert!(map.empty());
        assert_eq!(map.get_cell_value(GridIndex::new(3, -7, 12)), 0.0);
    }

    #[test]
    fn erase_block_if_removes_matching_blocks() {
        let mut map = test_map();
        map.set_cell_value(OctreeIndex::new(0, GridIndex::new(0, 0, 0)), 1.0);
        map.set_cell_value(OctreeIndex::new(0, GridIndex::new(100, 0, 0)), 1.0);
        assert_eq!(map.len(), 2);

        map.erase_block_if(|block_index, _| block_index.x > 0);
        assert_eq!(map.len(), 1);
        assert!(map.get_block(GridIndex::new(0, 0, 0)).is_some());
    }

    #[test]
    fn prune_drops_default_blocks() {
        let mut map = test_map();
        map.set_cell_value(OctreeIndex::new(0, GridIndex::new(0, 0, 0)), 1.0);
        map.set_cell_value(OctreeIndex::new(0, GridIndex::new(20, 0, 0)), 1.0);
        map.set_cell_value(OctreeIndex::new(0, GridIndex::new(20, 0, 0)), 0.0);
        map.prune();
        assert_eq!(map.len(), 1);
        assert!((map.get_cell_value(GridIndex::new(0, 0, 0)) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn leaf_visitor_reports_multiresolution_leaves() {
        let mut map = test_map();
        map.set_cell_value(OctreeIndex::new(2, GridIndex::new(0, 0, 0)), 1.0);
        let mut visited = Vec::new();
        map.for_each_leaf(|index, value| {
            if value.abs() > 1e-6 {
                visited.push((index, value));
            }
        });
        assert_eq!(visited.len(), 1);
        let (index, value) = visited[0];
        assert_eq!(index.height, 2);
        assert_eq!(index.position, GridIndex::new(0, 0, 0));
        assert!((value - 1.0).abs() < 1e-5);
    }
}
