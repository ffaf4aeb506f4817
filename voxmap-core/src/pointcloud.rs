use crate::geometry::point::{Point3D, Transformation3D};
use std::sync::OnceLock;

/// A plain list of 3d points.
#[derive(Clone, Debug, Default)]
pub struct Pointcloud {
    points: Vec<Point3D>,
}

impl Pointcloud {
    pub fn new(points: Vec<Point3D>) -> Self {
        Pointcloud { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn push(&mut self, point: Point3D) {
        self.points.push(point);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point3D> {
        self.points.iter()
    }

    pub fn points(&self) -> &[Point3D] {
        &self.points
    }
}

impl FromIterator<Point3D> for Pointcloud {
    fn from_iter<I: IntoIterator<Item = Point3D>>(iter: I) -> Self {
        Pointcloud {
            points: iter.into_iter().collect(),
        }
    }
}

/// A pointcloud in sensor coordinates together with the rigid transform
/// `T_W_C` from the sensor into the world frame.
#[derive(Clone, Debug)]
pub struct PosedPointcloud {
    pose: Transformation3D,
    points: Pointcloud,
    // Transformed into the world frame on first access.
    points_global: OnceLock<Vec<Point3D>>,
}

impl PosedPointcloud {
    pub fn new(pose: Transformation3D, points: Pointcloud) -> Self {
        PosedPointcloud {
            pose,
            points,
            points_global: OnceLock::new(),
        }
    }

    pub fn pose(&self) -> &Transformation3D {
        &self.pose
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The points in the sensor frame, as they were measured.
    pub fn points_local(&self) -> &[Point3D] {
        self.points.points()
    }

    /// The points transformed into the world frame.
    pub fn points_global(&self) -> &[Point3D] {
        self.points_global
            .get_or_init(|| self.points.iter().map(|p| self.pose * p).collect())
    }
}

/// Checks that the transform contains no NaN/inf components and that its
/// rotation quaternion is normalized.
pub fn is_pose_valid(pose: &Transformation3D) -> bool {
    let translation_finite = pose.translation.vector.iter().all(|v| v.is_finite());
    let quaternion = pose.rotation.quaternion();
    let rotation_finite = quaternion.coords.iter().all(|v| v.is_finite());
    translation_finite && rotation_finite && (quaternion.norm() - 1.0).abs() < 1e-3
}
