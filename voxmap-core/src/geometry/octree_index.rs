use crate::geometry::aabb::Aabb;
use crate::geometry::grid::GridIndex;
use crate::geometry::point::{FloatingPoint, IndexElement, Point3D, Vector3D};
use serde::{Deserialize, Serialize};

/// Number of children of an octree node.
pub const NUM_CHILDREN: usize = 8;

/// Identifies an octree node by its height and its position within the
/// grid of nodes at that height.
///
/// Height 0 nodes are the leaf cells. A node at height `h` covers a cube
/// with side length `min_cell_width * 2^h` whose min corner sits at
/// `position * 2^h * min_cell_width`. Children are numbered 0..8 by the
/// bit pattern of their relative (x, y, z) offsets, with x in bit 0.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct OctreeIndex {
    pub height: IndexElement,
    pub position: GridIndex,
}

impl OctreeIndex {
    pub fn new(height: IndexElement, position: GridIndex) -> Self {
        OctreeIndex { height, position }
    }

    /// Returns the child with the given relative child index, one level
    /// below this node.
    #[inline]
    pub fn child(self, relative_child_index: u8) -> OctreeIndex {
        debug_assert!((relative_child_index as usize) < NUM_CHILDREN);
        debug_assert!(self.height > 0);
        let bits = relative_child_index as IndexElement;
        OctreeIndex {
            height: self.height - 1,
            position: GridIndex {
                x: 2 * self.position.x + (bits & 1),
                y: 2 * self.position.y + ((bits >> 1) & 1),
                z: 2 * self.position.z + ((bits >> 2) & 1),
            },
        }
    }

    /// Returns all 8 children, ordered by relative child index.
    pub fn children(self) -> [OctreeIndex; NUM_CHILDREN] {
        std::array::from_fn(|i| self.child(i as u8))
    }

    /// Returns the node one level above that contains this node.
    #[inline]
    pub fn parent(self) -> OctreeIndex {
        OctreeIndex {
            height: self.height + 1,
            position: GridIndex {
                x: self.position.x >> 1,
                y: self.position.y >> 1,
                z: self.position.z >> 1,
            },
        }
    }

    /// The relative index of this node within its parent.
    #[inline]
    pub fn relative_child_index(self) -> u8 {
        ((self.position.x & 1) | ((self.position.y & 1) << 1) | ((self.position.z & 1) << 2)) as u8
    }

    /// The ancestor of this node at the given height.
    pub fn ancestor_at(self, height: IndexElement) -> OctreeIndex {
        debug_assert!(self.height <= height);
        let shift = height - self.height;
        OctreeIndex {
            height,
            position: GridIndex {
                x: self.position.x >> shift,
                y: self.position.y >> shift,
                z: self.position.z >> shift,
            },
        }
    }
}

/// Conversions between world points, leaf indices and node indices.
pub mod convert {
    use super::*;

    /// The leaf cell containing the given point.
    pub fn point_to_floor_index(point: &Point3D, cell_width_inv: FloatingPoint) -> GridIndex {
        GridIndex {
            x: (point.x * cell_width_inv).floor() as IndexElement,
            y: (point.y * cell_width_inv).floor() as IndexElement,
            z: (point.z * cell_width_inv).floor() as IndexElement,
        }
    }

    pub fn point_to_ceil_index(point: &Point3D, cell_width_inv: FloatingPoint) -> GridIndex {
        GridIndex {
            x: (point.x * cell_width_inv).ceil() as IndexElement,
            y: (point.y * cell_width_inv).ceil() as IndexElement,
            z: (point.z * cell_width_inv).ceil() as IndexElement,
        }
    }

    /// The leaf cell whose center is closest to the given point.
    pub fn point_to_nearest_index(point: &Point3D, cell_width_inv: FloatingPoint) -> GridIndex {
        GridIndex {
            x: (point.x * cell_width_inv - 0.5).round() as IndexElement,
            y: (point.y * cell_width_inv - 0.5).round() as IndexElement,
            z: (point.z * cell_width_inv - 0.5).round() as IndexElement,
        }
    }

    /// The node at `height` that contains the given leaf cell.
    pub fn leaf_index_to_node_index(leaf_index: GridIndex, height: IndexElement) -> OctreeIndex {
        OctreeIndex {
            height,
            position: GridIndex {
                x: leaf_index.x >> height,
                y: leaf_index.y >> height,
                z: leaf_index.z >> height,
            },
        }
    }

    /// The leaf cell at the min corner of the given node.
    pub fn node_index_to_min_corner_index(node_index: OctreeIndex) -> GridIndex {
        GridIndex {
            x: node_index.position.x << node_index.height,
            y: node_index.position.y << node_index.height,
            z: node_index.position.z << node_index.height,
        }
    }

    /// The leaf cell at the max corner of the given node (inclusive).
    pub fn node_index_to_max_corner_index(node_index: OctreeIndex) -> GridIndex {
        let width = (1 << node_index.height) - 1;
        node_index_to_min_corner_index(node_index).offset_by(GridIndex::splat(width))
    }

    /// The world-space center of the given leaf cell.
    pub fn index_to_center_point(index: GridIndex, cell_width: FloatingPoint) -> Point3D {
        Point3D::new(
            (index.x as FloatingPoint + 0.5) * cell_width,
            (index.y as FloatingPoint + 0.5) * cell_width,
            (index.z as FloatingPoint + 0.5) * cell_width,
        )
    }

    /// The world-space bounds of the given node.
    pub fn node_index_to_aabb(node_index: OctreeIndex, min_cell_width: FloatingPoint) -> Aabb {
        let node_width = min_cell_width * (1 << node_index.height) as FloatingPoint;
        let min = Point3D::new(
            node_index.position.x as FloatingPoint * node_width,
            node_index.position.y as FloatingPoint * node_width,
            node_index.position.z as FloatingPoint * node_width,
        );
        Aabb::new(min, min + Vector3D::repeat(node_width))
    }

    /// The world-space center of the given node.
    pub fn node_index_to_center_point(
        node_index: OctreeIndex,
        min_cell_width: FloatingPoint,
    ) -> Point3D {
        node_index_to_aabb(node_index, min_cell_width).center()
    }
}
