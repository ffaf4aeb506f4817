use crate::geometry::grid::GridIndex;
use crate::geometry::octree_index::{OctreeIndex, NUM_CHILDREN};
use crate::geometry::point::{FloatingPoint, IndexElement};
use crate::map::node::Node;
use crate::map::wavelet::{self, DetailCoefficients};
use crate::map::PRUNE_TOLERANCE;

/// One block of a hashed wavelet octree: the compressed scale pyramid of
/// the subtree rooted at `(tree_height, block_index)`.
///
/// The block stores its root scale plus a tree of detail coefficients.
/// Nodes at height 1 are the deepest stored nodes; the leaf scales below
/// them only exist implicitly, reconstructed through the wavelet
/// transform on demand.
#[derive(Clone, Debug)]
pub struct WaveletBlock {
    root_scale: FloatingPoint,
    root_node: Node<DetailCoefficients>,
    needs_pruning: bool,
    needs_thresholding: bool,
}

impl Default for WaveletBlock {
    fn default() -> Self {
        WaveletBlock {
            root_scale: 0.0,
            root_node: Node::default(),
            needs_pruning: false,
            needs_thresholding: false,
        }
    }
}

#[inline]
fn relative_child_at(position: GridIndex, shift: IndexElement) -> u8 {
    (((position.x >> shift) & 1)
        | (((position.y >> shift) & 1) << 1)
        | (((position.z >> shift) & 1) << 2)) as u8
}

impl WaveletBlock {
    #[inline]
    pub fn root_scale(&self) -> FloatingPoint {
        self.root_scale
    }

    #[inline]
    pub fn root_node(&self) -> &Node<DetailCoefficients> {
        &self.root_node
    }

    /// Split borrow of the root scale and root node, for in-place updates.
    pub fn root_mut(&mut self) -> (&mut FloatingPoint, &mut Node<DetailCoefficients>) {
        (&mut self.root_scale, &mut self.root_node)
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

    /// True if the whole block still holds the container's default value.
    pub fn is_default(&self) -> bool {
        self.root_scale.abs() <= PRUNE_TOLERANCE
            && !self.root_node.has_at_least_one_child()
            && self
                .root_node
                .data()
                .iter()
                .all(|d| d.abs() <= PRUNE_TOLERANCE)
    }

    /// Reconstructs the value of the leaf cell at the given block-local
    /// index. The result is not clamped to the map's log odds bounds.
    pub fn value_at(&self, local_leaf: GridIndex, tree_height: IndexElement) -> FloatingPoint {
        let mut scale = self.root_scale;
        let mut node = Some(&self.root_node);
        for child_height in (0..tree_height).rev() {
            let Some(current) = node else { break };
            let child_scales = wavelet::backward(scale, current.data());
            let rel = relative_child_at(local_leaf, child_height);
            scale = child_scales[rel as usize];
            node = current.child(rel);
        }
        scale
    }

    /// Sets the value of the node at the given block-local index,
    /// dropping any finer detail that was stored below it.
    pub fn set_value_at(
        &mut self,
        target: OctreeIndex,
        tree_height: IndexElement,
        new_value: FloatingPoint,
    ) {
        debug_assert!((0..=tree_height).contains(&target.height));
        if target.height == tree_height {
            self.root_scale = new_value;
            self.root_node = Node::default();
        } else {
            self.root_scale =
                set_value_recursive(&mut self.root_node, self.root_scale, tree_height, &target, new_value);
        }
        self.needs_pruning = true;
        self.needs_thresholding = true;
    }

    /// Calls the visitor for every leaf of the block with its
    /// reconstructed value, clamped to the given log odds bounds.
    pub fn for_each_leaf(
        &self,
        block_root_index: OctreeIndex,
        min_log_odds: FloatingPoint,
        max_log_odds: FloatingPoint,
        visitor: &mut impl FnMut(OctreeIndex, FloatingPoint),
    ) {
        for_each_leaf_recursive(
            &self.root_node,
            self.root_scale,
            block_root_index,
            min_log_odds,
            max_log_odds,
            visitor,
        );
    }

    /// Clamps all reconstructed leaf values into the log odds bounds and
    /// re-encodes the coefficients accordingly.
    pub fn threshold(&mut self, min_log_odds: FloatingPoint, max_log_odds: FloatingPoint) {
        if !self.needs_thresholding {
            return;
        }
        self.root_scale =
            threshold_recursive(&mut self.root_node, self.root_scale, min_log_odds, max_log_odds);
        self.needs_thresholding = false;
    }

    /// Thresholds the block if necessary, then collapses subtrees whose
    /// detail coefficients all vanish within tolerance.
    pub fn prune(&mut self, min_log_odds: FloatingPoint, max_log_odds: FloatingPoint) {
        self.threshold(min_log_odds, max_log_odds);
        prune_recursive(&mut self.root_node);
        self.needs_pruning = false;
    }
}

fn set_value_recursive(
    node: &mut Node<DetailCoefficients>,
    scale: FloatingPoint,
    node_height: IndexElement,
    target: &OctreeIndex,
    new_value: FloatingPoint,
) -> FloatingPoint {
    let mut child_scales = wavelet::backward(scale, node.data());
    let child_height = node_height - 1;
    let rel = relative_child_at(target.position, child_height - target.height);
    if child_height == target.height {
        child_scales[rel as usize] = new_value;
        node.erase_child(rel);
    } else {
        let child_scale = child_scales[rel as usize];
        let child = node.get_or_allocate_child(rel);
        child_scales[rel as usize] =
            set_value_recursive(child, child_scale, child_height, target, new_value);
    }
    let (new_scale, new_details) = wavelet::forward(child_scales);
    *node.data_mut() = new_details;
    new_scale
}

fn for_each_leaf_recursive(
    node: &Node<DetailCoefficients>,
    scale: FloatingPoint,
    node_index: OctreeIndex,
    min_log_odds: FloatingPoint,
    max_log_odds: FloatingPoint,
    visitor: &mut impl FnMut(OctreeIndex, FloatingPoint),
) {
    let child_scales = wavelet::backward(scale, node.data());
    for rel in 0..NUM_CHILDREN as u8 {
        let child_index = node_index.child(rel);
        let child_scale = child_scales[rel as usize];
        match node.child(rel) {
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
    node: &mut Node<DetailCoefficients>,
    scale: FloatingPoint,
    min_log_odds: FloatingPoint,
    max_log_odds: FloatingPoint,
) -> FloatingPoint {
    let mut child_scales = wavelet::backward(scale, node.data());
    for rel in 0..NUM_CHILDREN as u8 {
        let child_scale = child_scales[rel as usize];
        child_scales[rel as usize] = match node.child_mut(rel) {
            Some(child) => threshold_recursive(child, child_scale, min_log_odds, max_log_odds),
            None => child_scale.clamp(min_log_odds, max_log_odds),
        };
    }
    let (new_scale, new_details) = wavelet::forward(child_scales);
    *node.data_mut() = new_details;
    new_scale
}

fn prune_recursive(node: &mut Node<DetailCoefficients>) -> bool {
    for rel in 0..NUM_CHILDREN as u8 {
        if node.child_mut(rel).map(prune_recursive) == Some(true) {
            node.erase_child(rel);
        }
    }
    !node.has_at_least_one_child() && node.data().iter().all(|d| d.abs() <= PRUNE_TOLERANCE)
}
