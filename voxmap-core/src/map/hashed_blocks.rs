use crate::geometry::grid::GridIndex;
use crate::geometry::octree_index::OctreeIndex;
use crate::geometry::point::{FloatingPoint, IndexElement};
use crate::map::index_hash::IndexHash;
use std::collections::HashMap;

/// Number of leaf cells per dense block side.
pub const CELLS_PER_SIDE: IndexElement = 16;
const CELLS_PER_SIDE_LOG2: IndexElement = 4;
const CELLS_PER_BLOCK: usize =
    (CELLS_PER_SIDE * CELLS_PER_SIDE * CELLS_PER_SIDE) as usize;

/// Sparse map of plain f32 cell values, stored as dense per-block arrays.
///
/// Cells in unallocated blocks read back as the configured default value,
/// and a block only needs to exist once one of its cells deviates from
/// that default. Used as the output container of the SDF generator.
#[derive(Clone, Debug)]
pub struct HashedBlocks {
    min_cell_width: FloatingPoint,
    default_value: FloatingPoint,
    blocks: HashMap<GridIndex, Vec<FloatingPoint>, IndexHash>,
}

impl HashedBlocks {
    pub fn new(min_cell_width: FloatingPoint, default_value: FloatingPoint) -> Self {
        HashedBlocks {
            min_cell_width,
            default_value,
            blocks: HashMap::default(),
        }
    }

    #[inline]
    pub fn min_cell_width(&self) -> FloatingPoint {
        self.min_cell_width
    }

    #[inline]
    pub fn default_value(&self) -> FloatingPoint {
        self.default_value
    }

    #[inline]
    pub fn cells_per_block_side(&self) -> IndexElement {
        CELLS_PER_SIDE
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

    #[inline]
    fn split_index(cell_index: GridIndex) -> (GridIndex, usize) {
        let block = GridIndex::new(
            cell_index.x >> CELLS_PER_SIDE_LOG2,
            cell_index.y >> CELLS_PER_SIDE_LOG2,
            cell_index.z >> CELLS_PER_SIDE_LOG2,
        );
        let mask = CELLS_PER_SIDE - 1;
        let local = (
            cell_index.x & mask,
            cell_index.y & mask,
            cell_index.z & mask,
        );
        let linear = (local.0
            + local.1 * CELLS_PER_SIDE
            + local.2 * CELLS_PER_SIDE * CELLS_PER_SIDE) as usize;
        (block, linear)
    }

    pub fn get_cell_value(&self, cell_index: GridIndex) -> FloatingPoint {
        let (block_index, linear) = Self::split_index(cell_index);
        self.blocks
            .get(&block_index)
            .map(|values| values[linear])
            .unwrap_or(self.default_value)
    }

    /// Mutable access to a cell, allocating its block with default values
    /// on first touch.
    pub fn get_or_allocate_value(&mut self, cell_index: GridIndex) -> &mut FloatingPoint {
        let (block_index, linear) = Self::split_index(cell_index);
        let block = self
            .blocks
            .entry(block_index)
            .or_insert_with(|| vec![self.default_value; CELLS_PER_BLOCK]);
        &mut block[linear]
    }

    pub fn set_cell_value(&mut self, cell_index: GridIndex, value: FloatingPoint) {
        *self.get_or_allocate_value(cell_index) = value;
    }

    pub fn erase_block_if(
        &mut self,
        mut predicate: impl FnMut(GridIndex, &[FloatingPoint]) -> bool,
    ) {
        self.blocks.retain(|index, values| !predicate(*index, values));
    }

    /// Calls the visitor for every allocated cell whose value deviates
    /// from the default. All leaves are at height 0.
    pub fn for_each_leaf(&self, mut visitor: impl FnMut(OctreeIndex, FloatingPoint)) {
        for (block_index, values) in &self.blocks {
            let min_corner = GridIndex::new(
                block_index.x << CELLS_PER_SIDE_LOG2,
                block_index.y << CELLS_PER_SIDE_LOG2,
                block_index.z << CELLS_PER_SIDE_LOG2,
            );
            for (linear, &value) in values.iter().enumerate() {
                if value == self.default_value {
                    continue;
                }
                let linear = linear as IndexElement;
                let cell = GridIndex::new(
                    min_corner.x + (linear & (CELLS_PER_SIDE - 1)),
                    min_corner.y + ((linear / CELLS_PER_SIDE) & (CELLS_PER_SIDE - 1)),
                    min_corner.z + linear / (CELLS_PER_SIDE * CELLS_PER_SIDE),
                );
                visitor(OctreeIndex::new(0, cell), value);
            }
        }
    }
}
