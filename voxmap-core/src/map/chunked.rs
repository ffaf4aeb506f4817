use crate::geometry::grid::GridIndex;
use crate::geometry::octree_index::{OctreeIndex, NUM_CHILDREN};
use crate::geometry::point::{FloatingPoint, IndexElement};
use crate::map::hashed_wavelet_octree::MapConfig;
use crate::map::index_hash::IndexHash;
use crate::map::wavelet::{self, DetailCoefficients};
use crate::map::PRUNE_TOLERANCE;
use std::collections::HashMap;

/// Number of octree levels stored inline in each chunk.
pub const CHUNK_HEIGHT: IndexElement = 3;

/// Number of nodes stored inline in each chunk.
pub const NODES_PER_CHUNK: usize = tree_size::<3>(CHUNK_HEIGHT as u32);

/// Largest valid in-chunk node offset.
pub const MAX_NODE_OFFSET: usize = NODES_PER_CHUNK - 1;

/// Number of child chunks a chunk can reference.
pub const MAX_CHUNK_CHILDREN: usize = 1 << (3 * CHUNK_HEIGHT);

/// Offset of a chunk's root node.
pub const ROOT_OFFSET: usize = 0;

/// Number of nodes in a complete tree of the given depth.
pub const fn tree_size<const DIM: usize>(depth: u32) -> usize {
    ((1 << (DIM as u32 * depth)) - 1) / ((1 << DIM) - 1)
}

/// Depth of the node with the given dense in-chunk offset.
pub fn node_offset_to_depth<const DIM: usize>(offset: usize) -> u32 {
    let mut depth = 0;
    while tree_size::<DIM>(depth + 1) <= offset {
        depth += 1;
    }
    depth
}

/// Index of the node within its level, given its dense in-chunk offset.
pub fn node_offset_to_level_index<const DIM: usize>(offset: usize) -> usize {
    offset - tree_size::<DIM>(node_offset_to_depth::<DIM>(offset))
}

pub fn level_index_to_node_offset<const DIM: usize>(depth: u32, level_index: usize) -> usize {
    tree_size::<DIM>(depth) + level_index
}

/// Dense offset of a node's child. The result may exceed
/// [MAX_NODE_OFFSET], in which case the child lives in a child chunk.
pub fn node_offset_to_child_offset<const DIM: usize>(offset: usize, child_index: u8) -> usize {
    let depth = node_offset_to_depth::<DIM>(offset);
    let level_index = offset - tree_size::<DIM>(depth);
    tree_size::<DIM>(depth + 1) + (level_index << DIM) + child_index as usize
}

/// Contiguous storage for the first [CHUNK_HEIGHT] levels of an octree
/// subtree, with separately allocated chunks for anything deeper.
#[derive(Clone, Debug)]
pub struct Chunk {
    details: Vec<DetailCoefficients>,
    child_masks: Vec<u8>,
    // Lazily sized to MAX_CHUNK_CHILDREN on the first cross-chunk allocation.
    child_chunks: Vec<Option<Box<Chunk>>>,
}

impl Default for Chunk {
    fn default() -> Self {
        Chunk {
            details: vec![[0.0; 7]; NODES_PER_CHUNK],
            child_masks: vec![0; NODES_PER_CHUNK],
            child_chunks: Vec::new(),
        }
    }
}

impl Chunk {
    #[inline]
    pub fn node_details(&self, offset: usize) -> &DetailCoefficients {
        &self.details[offset]
    }

    #[inline]
    pub fn node_details_mut(&mut self, offset: usize) -> &mut DetailCoefficients {
        &mut self.details[offset]
    }

    #[inline]
    pub fn node_has_child(&self, offset: usize, child_index: u8) -> bool {
        self.child_masks[offset] & (1 << child_index) != 0
    }

    #[inline]
    pub fn node_has_any_child(&self, offset: usize) -> bool {
        self.child_masks[offset] != 0
    }

    pub(crate) fn node_set_has_child(&mut self, offset: usize, child_index: u8) {
        self.child_masks[offset] |= 1 << child_index;
    }

    fn node_clear_has_child(&mut self, offset: usize, child_index: u8) {
        self.child_masks[offset] &= !(1 << child_index);
    }

    pub fn child_chunk(&self, level_index: usize) -> Option<&Chunk> {
        self.child_chunks
            .get(level_index)
            .and_then(|chunk| chunk.as_deref())
    }

    fn child_chunk_mut(&mut self, level_index: usize) -> Option<&mut Chunk> {
        self.child_chunks
            .get_mut(level_index)
            .and_then(|chunk| chunk.as_deref_mut())
    }

    pub(crate) fn get_or_allocate_child_chunk(&mut self, level_index: usize) -> &mut Chunk {
        if self.child_chunks.is_empty() {
            self.child_chunks.resize_with(MAX_CHUNK_CHILDREN, || None);
        }
        self.child_chunks[level_index].get_or_insert_with(Default::default)
    }

    fn drop_child_chunk(&mut self, level_index: usize) {
        if let Some(slot) = self.child_chunks.get_mut(level_index) {
            *slot = None;
        }
    }

    /// Recursively clears the subtree below the node at `offset`,
    /// including the node's own detail coefficients.
    fn erase_subtree(&mut self, offset: usize) {
        for child_index in 0..NUM_CHILDREN as u8 {
            if !self.node_has_child(offset, child_index) {
                continue;
            }
            let child_offset = node_offset_to_child_offset::<3>(offset, child_index);
            if child_offset <= MAX_NODE_OFFSET {
                self.erase_subtree(child_offset);
            } else {
                self.drop_child_chunk(node_offset_to_level_index::<3>(child_offset));
            }
        }
        self.child_masks[offset] = 0;
        self.details[offset] = [0.0; 7];
    }

    fn is_default(&self) -> bool {
        self.child_masks[ROOT_OFFSET] == 0
            && self.details[ROOT_OFFSET]
                .iter()
                .all(|d| d.abs() <= PRUNE_TOLERANCE)
    }
}

/// Read-only reference to a node in a chunked octree.
///
/// `InChunk` points at a node inside a chunk by dense offset, while
/// `CrossChunk` refers to the root node of a child chunk.
#[derive(Copy, Clone)]
pub enum NodeHandle<'a> {
    InChunk { chunk: &'a Chunk, offset: usize },
    CrossChunk { chunk: &'a Chunk },
}

impl<'a> NodeHandle<'a> {
    pub fn new(chunk: &'a Chunk, offset: usize) -> Self {
        NodeHandle::InChunk { chunk, offset }
    }

    #[inline]
    fn parts(self) -> (&'a Chunk, usize) {
        match self {
            NodeHandle::InChunk { chunk, offset } => (chunk, offset),
            NodeHandle::CrossChunk { chunk } => (chunk, ROOT_OFFSET),
        }
    }

    pub fn details(self) -> &'a DetailCoefficients {
        let (chunk, offset) = self.parts();
        chunk.node_details(offset)
    }

    pub fn has_child(self, child_index: u8) -> bool {
        let (chunk, offset) = self.parts();
        chunk.node_has_child(offset, child_index)
    }

    /// Resolves the child node, following the chunk boundary when the
    /// child lives one chunk deeper.
    pub fn get_child(self, child_index: u8) -> Option<NodeHandle<'a>> {
        let (chunk, offset) = self.parts();
        if !chunk.node_has_child(offset, child_index) {
            return None;
        }
        let child_offset = node_offset_to_child_offset::<3>(offset, child_index);
        if child_offset <= MAX_NODE_OFFSET {
            Some(NodeHandle::InChunk {
                chunk,
                offset: child_offset,
            })
        } else {
            let level_index = node_offset_to_level_index::<3>(child_offset);
            chunk
                .child_chunk(level_index)
                .map(|child_chunk| NodeHandle::CrossChunk { chunk: child_chunk })
        }
    }
}

#[inline]
fn relative_child_at(position: GridIndex, shift: IndexElement) -> u8 {
    (((position.x >> shift) & 1)
        | (((position.y >> shift) & 1) << 1)
        | (((position.z >> shift) & 1) << 2)) as u8
}

/// One block of a hashed chunked wavelet octree. Same scale pyramid
/// semantics as [crate::map::block::WaveletBlock], but with the nodes
/// packed into chunks for cache locality.
#[derive(Clone, Debug, Default)]
pub struct ChunkedWaveletBlock {
    root_scale: FloatingPoint,
    root_chunk: Chunk,
    needs_pruning: bool,
    needs_thresholding: bool,
}

impl ChunkedWaveletBlock {
    #[inline]
    pub fn root_scale(&self) -> FloatingPoint {
        self.root_scale
    }

    pub fn root_chunk(&self) -> &Chunk {
        &self.root_chunk
    }

    pub fn root_mut(&mut self) -> (&mut FloatingPoint, &mut Chunk) {
        (&mut self.root_scale, &mut self.root_chunk)
    }

    pub fn needs_pruning(&self) -> bool {
        self.needs_pruning
    }

    pub fn set_needs_pruning(&mut self) {
        self.needs_pruning = true;
    }

    pub fn needs_thresholding(&self) -> bool {
        self.needs_thresholding
    }

    pub fn set_needs_thresholding(&mut self, needs_thresholding: bool) {
        self.needs_thresholding = needs_thresholding;
    }

    pub fn is_default(&self) -> bool {
        self.root_scale.abs() <= PRUNE_TOLERANCE && self.root_chunk.is_default()
    }

    pub fn value_at(&self, local_leaf: GridIndex, tree_height: IndexElement) -> FloatingPoint {
        let mut scale = self.root_scale;
        let mut node = Some(NodeHandle::new(&self.root_chunk, ROOT_OFFSET));
        for child_height in (0..tree_height).rev() {
            let Some(current) = node else { break };
            let child_scales = wavelet::backward(scale, current.details());
            let rel = relative_child_at(local_leaf, child_height);
            scale = child_scales[rel as usize];
            node = current.get_child(rel);
        }
        scale
    }

    pub fn set_value_at(
        &mut self,
        target: OctreeIndex,
        tree_height: IndexElement,
        new_value: FloatingPoint,
    ) {
        debug_assert!((0..=tree_height).contains(&target.height));
        if target.height == tree_height {
            self.root_scale = new_value;
            self.root_chunk = Chunk::default();
        } else {
            self.root_scale = set_value_recursive(
                &mut self.root_chunk,
                ROOT_OFFSET,
                self.root_scale,
                tree_height,
                &target,
                new_value,
            );
        }
        self.needs_pruning = true;
        self.needs_thresholding = true;
    }

    pub fn for_each_leaf(
        &self,
        block_root_index: OctreeIndex,
        min_log_odds: FloatingPoint,
        max_log_odds: FloatingPoint,
        visitor: &mut impl FnMut(OctreeIndex, FloatingPoint),
    ) {
        for_each_leaf_recursive(
            NodeHandle::new(&self.root_chunk, ROOT_OFFSET),
            self.root_scale,
            block_root_index,
            min_log_odds,
            max_log_odds,
            visitor,
        );
    }

    pub fn threshold(&mut self, min_log_odds: FloatingPoint, max_log_odds: FloatingPoint) {
        if !self.needs_thresholding {
            return;
        }
        self.root_scale = threshold_recursive(
            &mut self.root_chunk,
            ROOT_OFFSET,
            self.root_scale,
            min_log_odds,
            max_log_odds,
        );
        self.needs_thresholding = false;
    }

    pub fn prune(&mut self, min_log_odds: FloatingPoint, max_log_odds: FloatingPoint) {
        self.threshold(min_log_odds, max_log_odds);
        prune_recursive(&mut self.root_chunk, ROOT_OFFSET);
        self.needs_pruning = false;
    }
}

fn set_value_recursive(
    chunk: &mut Chunk,
    offset: usize,
    scale: FloatingPoint,
    node_height: IndexElement,
    target: &OctreeIndex,
    new_value: FloatingPoint,
) -> FloatingPoint {
    let mut child_scales = wavelet::backward(scale, chunk.node_details(offset));
    let child_height = node_height - 1;
    let rel = relative_child_at(target.position, child_height - target.height);
    if child_height == target.height {
        let child_offset = node_offset_to_child_offset::<3>(offset, rel);
        if chunk.node_has_child(offset, rel) {
            if child_offset <= MAX_NODE_OFFSET {
                chunk.erase_subtree(child_offset);
            } else {
                chunk.drop_child_chunk(node_offset_to_level_index::<3>(child_offset));
            }
        }
        chunk.node_clear_has_child(offset, rel);
        child_scales[rel as usize] = new_value;
    } else {
        chunk.node_set_has_child(offset, rel);
        let child_offset = node_offset_to_child_offset::<3>(offset, rel);
        let child_scale = child_scales[rel as usize];
        child_scales[rel as usize] = if child_offset <= MAX_NODE_OFFSET {
            set_value_recursive(chunk, child_offset, child_scale, child_height, target, new_value)
        } else {
            let level_index = node_offset_to_level_index::<3>(child_offset);
            let child_chunk = chunk.get_or_allocate_child_chunk(level_index);
            set_value_recursive(
                child_chunk,
                ROOT_OFFSET,
                child_scale,
                child_height,
                target,
                new_value,
            )
        };
    }
    let (new_scale, new_details) = wavelet::forward(child_scales);
    *chunk.node_details_mut(offset) = new_details;
    new_scale
}

fn for_each_leaf_recursive(
    node: NodeHandle<'_>,
    scale: FloatingPoint,
    node_index: OctreeIndex,
    min_log_odds: FloatingPoint,
    max_log_odds: FloatingPoint,
    visitor: &mut impl FnMut(OctreeIndex, FloatingPoint),
) {
    let child_scales = wavelet::backward(scale, node.details());
    for rel in 0..NUM_CHILDREN as u8 {
        let child_index = node_index.child(rel);
        let child_scale = child_scales[rel as usize];
        match node.get_child(rel) {
            Some(child) if child_index.height > 0 => for_each_leaf_recursive(
                child,
                child_scale,
                child_index,
                min_log_odds,
                max_log_odds,
                visitor,
            ),
            _ => visitor(child_index, child_scale.clamp(min_log_odds, max_log_odds)),
        }
    }
}

fn threshold_recursive(
    chunk: &mut Chunk,
    offset: usize,
    scale: FloatingPoint,
    min_log_odds: FloatingPoint,
    max_log_odds: FloatingPoint,
) -> FloatingPoint {
    let mut child_scales = wavelet::backward(scale, chunk.node_details(offset));
    for rel in 0..NUM_CHILDREN as u8 {
        let child_scale = child_scales[rel as usize];
        child_scales[rel as usize] = if chunk.node_has_child(offset, rel) {
            let child_offset = node_offset_to_child_offset::<3>(offset, rel);
            if child_offset <= MAX_NODE_OFFSET {
                threshold_recursive(chunk, child_offset, child_scale, min_log_odds, max_log_odds)
            } else {
                let level_index = node_offset_to_level_index::<3>(child_offset);
                match chunk.child_chunk_mut(level_index) {
                    Some(child_chunk) => threshold_recursive(
                        child_chunk,
                        ROOT_OFFSET,
                        child_scale,
                        min_log_odds,
                        max_log_odds,
                    ),
                    None => child_scale.clamp(min_log_odds, max_log_odds),
                }
            }
        } else {
            child_scale.clamp(min_log_odds, max_log_odds)
        };
    }
    let (new_scale, new_details) = wavelet::forward(child_scales);
    *chunk.node_details_mut(offset) = new_details;
    new_scale
}

fn prune_recursive(chunk: &mut Chunk, offset: usize) -> bool {
    for rel in 0..NUM_CHILDREN as u8 {
        if !chunk.node_has_child(offset, rel) {
            continue;
        }
        let child_offset = node_offset_to_child_offset::<3>(offset, rel);
        if child_offset <= MAX_NODE_OFFSET {
            if prune_recursive(chunk, child_offset) {
                chunk.erase_subtree(child_offset);
                chunk.node_clear_has_child(offset, rel);
            }
        } else {
            let level_index = node_offset_to_level_index::<3>(child_offset);
            let prunable = chunk
                .child_chunk_mut(level_index)
                .map(|child_chunk| prune_recursive(child_chunk, ROOT_OFFSET))
                .unwrap_or(true);
            if prunable {
                chunk.drop_child_chunk(level_index);
                chunk.node_clear_has_child(offset, rel);
            }
        }
    }
    !chunk.node_has_any_child(offset)
        && chunk
            .node_details(offset)
            .iter()
            .all(|d| d.abs() <= PRUNE_TOLERANCE)
}

/// Sparse occupancy map with chunked per-block storage. Same interface
/// and semantics as [crate::map::hashed_wavelet_octree::HashedWaveletOctree].
#[derive(Clone, Debug, Default)]
pub struct HashedChunkedWaveletOctree {
    config: MapConfig,
    blocks: HashMap<GridIndex, ChunkedWaveletBlock, IndexHash>,
}

impl HashedChunkedWaveletOctree {
    pub fn new(config: MapConfig) -> Self {
        HashedChunkedWaveletOctree {
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

    #[inline]
    pub fn cells_per_block_side(&self) -> IndexElement {
        1 << self.config.tree_height
    }

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

    pub fn get_block(&self, block_index: GridIndex) -> Option<&ChunkedWaveletBlock> {
        self.blocks.get(&block_index)
    }

    pub fn get_block_mut(&mut self, block_index: GridIndex) -> Option<&mut ChunkedWaveletBlock> {
        self.blocks.get_mut(&block_index)
    }

    pub fn get_or_allocate_block(&mut self, block_index: GridIndex) -> &mut ChunkedWaveletBlock {
        self.blocks.entry(block_index).or_default()
    }

    pub fn blocks(&self) -> impl Iterator<Item = (GridIndex, &ChunkedWaveletBlock)> {
        self.blocks.iter().map(|(index, block)| (*index, block))
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = (GridIndex, &mut ChunkedWaveletBlock)> {
        self.blocks.iter_mut().map(|(index, block)| (*index, block))
    }

    pub fn erase_block_if(
        &mut self,
        mut predicate: impl FnMut(GridIndex, &ChunkedWaveletBlock) -> bool,
    ) {
        self.blocks.retain(|index, block| !predicate(*index, block));
    }

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
    use super::*;
    use crate::map::hashed_wavelet_octree::HashedWaveletOctree;
    use rand::Rng;

    #[test]
    fn offset_algebra_3d() {
        assert_eq!(tree_size::<3>(1), 1);
        assert_eq!(tree_size::<3>(2), 9);
        assert_eq!(tree_size::<3>(3), 73);

        assert_eq!(node_offset_to_depth::<3>(0), 0);
        assert_eq!(node_offset_to_depth::<3>(1), 1);
        assert_eq!(node_offset_to_depth::<3>(8), 1);
        assert_eq!(node_offset_to_depth::<3>(9), 2);
        assert_eq!(node_offset_to_depth::<3>(72), 2);

        assert_eq!(node_offset_to_level_index::<3>(0), 0);
        assert_eq!(node_offset_to_level_index::<3>(1), 0);
        assert_eq!(node_offset_to_level_index::<3>(8), 7);
        assert_eq!(node_offset_to_level_index::<3>(9), 0);

        // The root's children occupy offsets 1..=8.
        for child in 0..8u8 {
            assert_eq!(node_offset_to_child_offset::<3>(0, child), 1 + child as usize);
        }
        // The first child's children start right after the first level.
        assert_eq!(node_offset_to_child_offset::<3>(1, 0), 9);
        assert_eq!(node_offset_to_child_offset::<3>(1, 7), 16);
        assert_eq!(node_offset_to_child_offset::<3>(2, 0), 17);
        // Children of the deepest in-chunk level land beyond the chunk.
        assert!(node_offset_to_child_offset::<3>(9, 0) > MAX_NODE_OFFSET);
        assert_eq!(node_offset_to_child_offset::<3>(9, 0), 73);
        assert_eq!(node_offset_to_level_index::<3>(73), 0);

        assert_eq!(level_index_to_node_offset::<3>(2, 5), 14);
    }

    #[test]
    fn offset_algebra_2d() {
        assert_eq!(tree_size::<2>(1), 1);
        assert_eq!(tree_size::<2>(2), 5);
        assert_eq!(tree_size::<2>(3), 21);
        assert_eq!(node_offset_to_child_offset::<2>(0, 3), 4);
        assert_eq!(node_offset_to_child_offset::<2>(1, 0), 5);
        assert_eq!(node_offset_to_depth::<2>(20), 2);
    }

    #[test]
    fn set_and_get_values_across_chunk_boundaries() {
        // tree_height 5 makes the deepest nodes live one chunk below the root chunk.
        let mut map = HashedChunkedWaveletOctree::new(MapConfig {
            tree_height: 5,
            ..MapConfig::default()
        });
        let cells = [
            GridIndex::new(0, 0, 0),
            GridIndex::new(31, 31, 31),
            GridIndex::new(-5, 8, 100),
        ];
        for (i, &cell) in cells.iter().enumerate() {
            map.set_cell_value(OctreeIndex::new(0, cell), i as f32 + 0.5);
        }
        for (i, &cell) in cells.iter().enumerate() {
            assert!(
                (map.get_cell_value(cell) - (i as f32 + 0.5)).abs() < 1e-4,
                "wrong value at {cell:?}"
            );
        }
        assert!(map.get_cell_value(GridIndex::new(7, 7, 7)).abs() < 1e-4);
    }

    #[test]
    fn matches_node_based_map() {
        let config = MapConfig {
            tree_height: 5,
            ..MapConfig::default()
        };
        let mut chunked = HashedChunkedWaveletOctree::new(config);
        let mut reference = HashedWaveletOctree::new(config);

        let mut rng = rand::thread_rng();
        let cells: Vec<GridIndex> = (0..200)
            .map(|_| {
                GridIndex::new(
                    rng.gen_range(-40..40),
                    rng.gen_range(-40..40),
                    rng.gen_range(-40..40),
                )
            })
            .collect();
        for &cell in &cells {
            let value = rng.gen_range(-2.0..4.0);
            chunked.set_cell_value(OctreeIndex::new(0, cell), value);
            reference.set_cell_value(OctreeIndex::new(0, cell), value);
        }
        chunked.prune();
        reference.prune();

        for &cell in &cells {
            assert!(
                (chunked.get_cell_value(cell) - reference.get_cell_value(cell)).abs() < 1e-4,
                "chunked and node based maps disagree at {cell:?}"
            );
        }
    }

    #[test]
    fn pruning_preserves_chunked_queries() {
        let mut map = HashedChunkedWaveletOctree::new(MapConfig {
            tree_height: 5,
            ..MapConfig::default()
        });
        let mut rng = rand::thread_rng();
        let cells: Vec<GridIndex> = (0..100)
            .map(|_| {
                GridIndex::new(
                    rng.gen_range(0..32),
                    rng.gen_range(0..32),
                    rng.gen_range(0..32),
                )
            })
            .collect();
        for &cell in &cells {
            map.set_cell_value(OctreeIndex::new(0, cell), rng.gen_range(-2.0..4.0));
        }
        let before: Vec<f32> = cells.iter().map(|&c| map.get_cell_value(c)).collect();
        map.prune();
        for (&cell, &value) in cells.iter().zip(before.iter()) {
            assert!((map.get_cell_value(cell) - value).abs() < 1e-4);
        }
    }

    #[test]
    fn node_handle_follows_chunk_boundary() {
        let mut map = HashedChunkedWaveletOctree::new(MapConfig {
            tree_height: 5,
            ..MapConfig::default()
        });
        map.set_cell_value(OctreeIndex::new(0, GridIndex::new(0, 0, 0)), 1.0);
        let block = map.get_block(GridIndex::new(0, 0, 0)).unwrap();

        // Walk down the first-child path: after CHUNK_HEIGHT steps the
        // handle must have crossed into a child chunk.
        let mut node = NodeHandle::new(block.root_chunk(), ROOT_OFFSET);
        for _ in 0..CHUNK_HEIGHT {
            node = node.get_child(0).unwrap();
        }
        assert!(matches!(node, NodeHandle::CrossChunk { .. }));
    }
}
