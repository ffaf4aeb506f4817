use nalgebra::{Isometry3, Point3, Vector2, Vector3};

/// The scalar type used for all map values and world coordinates.
pub type FloatingPoint = f32;

/// The scalar type used for all cell and block indices.
pub type IndexElement = i32;

pub type Point3D = Point3<FloatingPoint>;
pub type Vector3D = Vector3<FloatingPoint>;
pub type Vector2D = Vector2<FloatingPoint>;

/// Index of a pixel in a (range) image, as (row, col).
pub type PixelIndex = Vector2<IndexElement>;

/// A rigid body transformation (rotation + translation).
pub type Transformation3D = Isometry3<FloatingPoint>;

/// Half the diagonal of a cube with unit-length sides.
pub const UNIT_CUBE_HALF_DIAGONAL: FloatingPoint = 0.866_025_4;

/// Magnitudes below this threshold are considered measurement noise.
/// Comparisons that decide between map update types are biased by it, so
/// that borderline cases resolve to the conservative choice.
pub const NOISE_THRESHOLD: FloatingPoint = 1e-4;
