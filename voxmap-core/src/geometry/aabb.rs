use crate::geometry::point::{FloatingPoint, Point3D};
use serde::{Deserialize, Serialize};

/// An axis aligned bounding box with inclusive min and max corners.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3D,
    pub max: Point3D,
}

impl Aabb {
    /// Create a new AABB from the specified bounds.
    /// Panics, if for any component the min bound is larger than the max bound.
    pub fn new(min: Point3D, max: Point3D) -> Self {
        assert!(min.x <= max.x);
        assert!(min.y <= max.y);
        assert!(min.z <= max.z);
        Aabb { min, max }
    }

    #[inline]
    pub fn center(&self) -> Point3D {
        nalgebra::center(&self.min, &self.max)
    }

    /// Side length along the x axis. Cubic boxes have the same width on all axes.
    #[inline]
    pub fn width(&self) -> FloatingPoint {
        self.max.x - self.min.x
    }

    pub fn contains(&self, point: &Point3D) -> bool {
        self.min.x <= point.x
            && self.min.y <= point.y
            && self.min.z <= point.z
            && self.max.x >= point.x
            && self.max.y >= point.y
            && self.max.z >= point.z
    }

    /// Returns the corner selected by the bit pattern of `i`,
    /// bit 0 choosing between min.x and max.x, bit 1 the y axis, bit 2 the z axis.
    pub fn corner(&self, i: usize) -> Point3D {
        debug_assert!(i < 8);
        Point3D::new(
            if i & 0b001 == 0 { self.min.x } else { self.max.x },
            if i & 0b010 == 0 { self.min.y } else { self.max.y },
            if i & 0b100 == 0 { self.min.z } else { self.max.z },
        )
    }

    /// The point inside the box that is closest to `point`.
    pub fn closest_point_to(&self, point: &Point3D) -> Point3D {
        Point3D::new(
            point.x.clamp(self.min.x, self.max.x),
            point.y.clamp(self.min.y, self.max.y),
            point.z.clamp(self.min.z, self.max.z),
        )
    }

    /// The point inside the box that is furthest from `point`.
    pub fn furthest_point_from(&self, point: &Point3D) -> Point3D {
        Point3D::new(
            if point.x < (self.min.x + self.max.x) / 2.0 {
                self.max.x
            } else {
                self.min.x
            },
            if point.y < (self.min.y + self.max.y) / 2.0 {
                self.max.y
            } else {
                self.min.y
            },
            if point.z < (self.min.z + self.max.z) / 2.0 {
                self.max.z
            } else {
                self.min.z
            },
        )
    }

    /// Distance from `point` to the nearest point of the box.
    /// Zero for points inside the box.
    pub fn min_distance_to(&self, point: &Point3D) -> FloatingPoint {
        nalgebra::distance(&self.closest_point_to(point), point)
    }

    /// Distance from `point` to the furthest point of the box.
    pub fn max_distance_to(&self, point: &Point3D) -> FloatingPoint {
        nalgebra::distance(&self.furthest_point_from(point), point)
    }
}

#[cfg(test)]
mod tests {
    use super::Aabb;
    use crate::geometry::point::Point3D;

    #[test]
    fn contains() {
        let aabb = Aabb::new(Point3D::new(2.0, 4.0, 1.0), Point3D::new(4.0, 5.0, 2.0));
        assert!(aabb.contains(&Point3D::new(2.0, 4.0, 1.0)));
        assert!(aabb.contains(&Point3D::new(3.0, 4.5, 1.5)));
        assert!(aabb.contains(&Point3D::new(4.0, 5.0, 2.0)));
        assert!(!aabb.contains(&Point3D::new(1.5, 4.5, 1.5)));
        assert!(!aabb.contains(&Point3D::new(3.0, 5.5, 1.5)));
        assert!(!aabb.contains(&Point3D::new(3.0, 4.5, 2.5)));
    }

    #[test]
    fn min_max_distance() {
        let aabb = Aabb::new(Point3D::new(1.0, 0.0, 0.0), Point3D::new(2.0, 1.0, 1.0));

        // inside
        assert_eq!(aabb.min_distance_to(&Point3D::new(1.5, 0.5, 0.5)), 0.0);

        // on axis
        assert_eq!(aabb.min_distance_to(&Point3D::new(0.0, 0.5, 0.5)), 1.0);
        assert_eq!(aabb.min_distance_to(&Point3D::new(4.0, 0.5, 0.5)), 2.0);

        // furthest corner from the origin is (2, 1, 1)
        let d = aabb.max_distance_to(&Point3D::new(0.0, 0.0, 0.0));
        assert!((d - 6.0_f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn corners() {
        let aabb = Aabb::new(Point3D::new(0.0, 0.0, 0.0), Point3D::new(1.0, 2.0, 3.0));
        assert_eq!(aabb.corner(0), Point3D::new(0.0, 0.0, 0.0));
        assert_eq!(aabb.corner(0b101), Point3D::new(1.0, 0.0, 3.0));
        assert_eq!(aabb.corner(7), Point3D::new(1.0, 2.0, 3.0));
    }
}
