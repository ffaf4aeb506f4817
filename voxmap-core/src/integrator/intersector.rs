use crate::geometry::aabb::Aabb;
use crate::geometry::point::{
    FloatingPoint, IndexElement, PixelIndex, Point3D, Transformation3D, NOISE_THRESHOLD,
};
use crate::integrator::hierarchical::HierarchicalRangeImage;
use crate::integrator::projection::Projector;
use crate::integrator::range_image::PosedRangeImage;

/// How a node has to be updated given the current measurement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UpdateType {
    /// No pixel observes the node; it can be skipped entirely.
    FullyUnobserved,
    /// The node lies fully in front of all returns that could see it, so
    /// it only receives free-space (or no) updates.
    FreeOrUnknown,
    /// The node may contain a measured surface.
    PossiblyOccupied,
}

/// Classifies world-space AABBs against a posed range image using the
/// min/max bounds pyramids.
pub struct RangeImageIntersector<'a, const AZIMUTH_WRAPS: bool> {
    hierarchy: HierarchicalRangeImage<'a, AZIMUTH_WRAPS>,
    projector: &'a dyn Projector,
    min_range: FloatingPoint,
    max_range: FloatingPoint,
}

impl<'a, const AZIMUTH_WRAPS: bool> RangeImageIntersector<'a, AZIMUTH_WRAPS> {
    pub fn new(
        posed_range_image: &'a PosedRangeImage,
        projector: &'a dyn Projector,
        min_range: FloatingPoint,
        max_range: FloatingPoint,
    ) -> Self {
        RangeImageIntersector {
            hierarchy: HierarchicalRangeImage::new(posed_range_image.image()),
            projector,
            min_range,
            max_range,
        }
    }

    /// Classifies the AABB's update type for a sensor at `sensor_origin`
    /// with world-to-sensor transform `pose_inverse`.
    ///
    /// Borderline comparisons are biased towards [UpdateType::PossiblyOccupied],
    /// the conservative choice.
    pub fn determine_update_type(
        &self,
        aabb: &Aabb,
        pose_inverse: &Transformation3D,
        sensor_origin: &Point3D,
    ) -> UpdateType {
        let d_near = aabb.min_distance_to(sensor_origin);
        let d_far = aabb.max_distance_to(sensor_origin);
        if d_near > self.max_range || d_far < self.min_range {
            return UpdateType::FullyUnobserved;
        }

        let dimensions = self.projector.dimensions();
        let last_row = dimensions.x - 1;
        let last_col = dimensions.y - 1;

        let footprint = if aabb.contains(sensor_origin) {
            // Boxes around the sensor project onto the whole image.
            Some((0, last_row, 0, last_col))
        } else {
            self.corner_projection_footprint(aabb, pose_inverse, sensor_origin, last_row, last_col)
        };
        let Some((min_row, max_row, min_col, max_col)) = footprint else {
            return UpdateType::FullyUnobserved;
        };

        let bounds = self.hierarchy.get_range_bounds(
            PixelIndex::new(min_row, min_col),
            PixelIndex::new(max_row, max_col),
        );

        if bounds.upper + NOISE_THRESHOLD < d_near {
            // Entirely behind every surface observed in the interval.
            return UpdateType::FullyUnobserved;
        }
        if d_far < bounds.lower - NOISE_THRESHOLD {
            return UpdateType::FreeOrUnknown;
        }
        UpdateType::PossiblyOccupied
    }

    /// Pixel interval covered by the AABB's corner projections, or `None`
    /// if the footprint misses the image entirely. The column interval
    /// may wrap (`min_col > max_col`) when `AZIMUTH_WRAPS`.
    fn corner_projection_footprint(
        &self,
        aabb: &Aabb,
        pose_inverse: &Transformation3D,
        sensor_origin: &Point3D,
        last_row: IndexElement,
        last_col: IndexElement,
    ) -> Option<(IndexElement, IndexElement, IndexElement, IndexElement)> {
        // The azimuth extremes of the AABB's footprint always occur at
        // corners, but the elevation extremes can sit on the vertical
        // column closest to the sensor. Project that column's endpoints
        // along with the 8 corners.
        let closest = aabb.closest_point_to(sensor_origin);
        let mut candidates = [Point3D::origin(); 10];
        for (corner_index, candidate) in candidates.iter_mut().enumerate().take(8) {
            *candidate = aabb.corner(corner_index);
        }
        candidates[8] = Point3D::new(closest.x, closest.y, aabb.min.z);
        candidates[9] = Point3D::new(closest.x, closest.y, aabb.max.z);

        let mut min_row = FloatingPoint::MAX;
        let mut max_row = FloatingPoint::MIN;
        let mut candidate_cols = [0.0; 10];
        for (candidate, candidate_col) in candidates.iter().zip(candidate_cols.iter_mut()) {
            let c_candidate = pose_inverse * candidate;
            let coordinates = self.projector.cartesian_to_sensor(&c_candidate);
            if coordinates.depth < 1e-6 {
                // Degenerate projection; the footprint cannot be bounded
                // from sample points alone.
                return Some((0, last_row, 0, last_col));
            }
            let float_index = self.projector.image_to_float_index(&coordinates.image);
            min_row = min_row.min(float_index.x);
            max_row = max_row.max(float_index.x);
            *candidate_col = float_index.y;
        }

        let min_row = min_row.floor() as IndexElement;
        let max_row = max_row.ceil() as IndexElement;
        if max_row < 0 || last_row < min_row {
            return None;
        }
        let min_row = min_row.clamp(0, last_row);
        let max_row = max_row.clamp(0, last_row);

        let (min_col, max_col) = if AZIMUTH_WRAPS {
            // When no half circle contains all candidate azimuths, the
            // sensor's vertical axis passes through the box and interior
            // points can project anywhere, including far outside the
            // candidates' row interval. Fall back to the whole image.
            let Some(arc) = minimal_covering_arc(&mut candidate_cols, last_col + 1) else {
                return Some((0, last_row, 0, last_col));
            };
            arc
        } else {
            let mut min_col = FloatingPoint::MAX;
            let mut max_col = FloatingPoint::MIN;
            for &col in &candidate_cols {
                min_col = min_col.min(col);
                max_col = max_col.max(col);
            }
            let min_col = min_col.floor() as IndexElement;
            let max_col = max_col.ceil() as IndexElement;
            if max_col < 0 || last_col < min_col {
                return None;
            }
            (min_col.clamp(0, last_col), max_col.clamp(0, last_col))
        };

        Some((min_row, max_row, min_col, max_col))
    }
}

/// Finds the smallest cyclic pixel interval covering all column
/// positions, as the complement of the largest cyclic gap between them.
/// Returns `None` when the positions do not fit in a half circle; the
/// interval may wrap, in which case `min_col > max_col`.
fn minimal_covering_arc(
    columns: &mut [FloatingPoint],
    num_cols: IndexElement,
) -> Option<(IndexElement, IndexElement)> {
    debug_assert!(!columns.is_empty());
    let period = num_cols as FloatingPoint;
    for col in columns.iter_mut() {
        *col = col.rem_euclid(period);
    }
    columns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let last = columns.len() - 1;
    let mut largest_gap = columns[0] + period - columns[last];
    let mut arc = (columns[0], columns[last]);
    for i in 1..columns.len() {
        let gap = columns[i] - columns[i - 1];
        if gap > largest_gap {
            largest_gap = gap;
            arc = (columns[i], columns[i - 1]);
        }
    }
    if largest_gap < 0.5 * period {
        return None;
    }

    let min_col = (arc.0.floor() as IndexElement).rem_euclid(num_cols);
    let max_col = (arc.1.ceil() as IndexElement).rem_euclid(num_cols);
    Some((min_col, max_col))
}

#[cfg(test)]
mod tests {
    use super::{RangeImageIntersector, UpdateType};
    use crate::geometry::aabb::Aabb;
    use crate::geometry::point::{Point3D, Transformation3D, Vector3D};
    use crate::integrator::projection::{
        Projector, SphericalProjector, SphericalProjectorConfig,
    };
    use crate::integrator::range_image::PosedRangeImage;
    use rand::Rng;
    use std::f32::consts::{FRAC_PI_4, PI};

    fn test_projector() -> SphericalProjector {
        SphericalProjector::new(SphericalProjectorConfig {
            elevation_min: -FRAC_PI_4,
            elevation_max: FRAC_PI_4,
            num_rows: 16,
            azimuth_min: -PI,
            azimuth_max: PI,
            num_cols: 32,
        })
        .unwrap()
    }

    fn uniform_range_image(range: f32) -> PosedRangeImage {
        let mut image = PosedRangeImage::new(16, 32);
        image.reset(Transformation3D::identity());
        for row in 0..16 {
            for col in 0..32 {
                *image.image_mut().at_mut(row, col) = range;
            }
        }
        image
    }

    fn cube_at(center: Point3D, half_width: f32) -> Aabb {
        Aabb::new(
            center - Vector3D::repeat(half_width),
            center + Vector3D::repeat(half_width),
        )
    }

    #[test]
    fn classification_against_uniform_surface() {
        let projector = test_projector();
        let image = uniform_range_image(3.0);
        let intersector = RangeImageIntersector::<true>::new(&image, &projector, 0.5, 10.0);
        let pose_inverse = Transformation3D::identity();
        let origin = Point3D::new(0.0, 0.0, 0.0);

        // Clearly in front of the surface.
        assert_eq!(
            intersector.determine_update_type(
                &cube_at(Point3D::new(1.5, 0.0, 0.0), 0.1),
                &pose_inverse,
                &origin
            ),
            UpdateType::FreeOrUnknown
        );
        // Straddling the surface.
        assert_eq!(
            intersector.determine_update_type(
                &cube_at(Point3D::new(3.0, 0.0, 0.0), 0.1),
                &pose_inverse,
                &origin
            ),
            UpdateType::PossiblyOccupied
        );
        // Behind the surface.
        assert_eq!(
            intersector.determine_update_type(
                &cube_at(Point3D::new(5.0, 0.0, 0.0), 0.1),
                &pose_inverse,
                &origin
            ),
            UpdateType::FullyUnobserved
        );
        // Beyond the maximum range.
        assert_eq!(
            intersector.determine_update_type(
                &cube_at(Point3D::new(20.0, 0.0, 0.0), 0.1),
                &pose_inverse,
                &origin
            ),
            UpdateType::FullyUnobserved
        );
        // Outside the vertical field of view.
        assert_eq!(
            intersector.determine_update_type(
                &cube_at(Point3D::new(0.3, 0.0, 3.0), 0.1),
                &pose_inverse,
                &origin
            ),
            UpdateType::FullyUnobserved
        );
    }

    #[test]
    fn boxes_containing_the_sensor_use_the_full_image() {
        let projector = test_projector();
        let image = uniform_range_image(3.0);
        let intersector = RangeImageIntersector::<true>::new(&image, &projector, 0.5, 10.0);
        let pose_inverse = Transformation3D::identity();
        let origin = Point3D::new(0.0, 0.0, 0.0);

        // A box around the sensor well inside the measured surface is free.
        assert_eq!(
            intersector.determine_update_type(&cube_at(origin, 1.0), &pose_inverse, &origin),
            UpdateType::FreeOrUnknown
        );
        // Once it reaches out to the surface it may contain obstacles.
        assert_eq!(
            intersector.determine_update_type(&cube_at(origin, 3.5), &pose_inverse, &origin),
            UpdateType::PossiblyOccupied
        );
    }

    #[test]
    fn boxes_behind_the_sensor_wrap_across_the_azimuth_border() {
        let projector = test_projector();
        let image = uniform_range_image(3.0);
        let intersector = RangeImageIntersector::<true>::new(&image, &projector, 0.5, 10.0);

        // A box behind the sensor (negative x) projects around azimuth
        // +-pi, where the pixel interval wraps across the image border.
        assert_eq!(
            intersector.determine_update_type(
                &cube_at(Point3D::new(-1.5, 0.0, 0.0), 0.2),
                &Transformation3D::identity(),
                &Point3D::new(0.0, 0.0, 0.0)
            ),
            UpdateType::FreeOrUnknown
        );
        assert_eq!(
            intersector.determine_update_type(
                &cube_at(Point3D::new(-3.0, 0.0, 0.0), 0.2),
                &Transformation3D::identity(),
                &Point3D::new(0.0, 0.0, 0.0)
            ),
            UpdateType::PossiblyOccupied
        );
    }

    #[test]
    fn fully_unobserved_is_conservative() {
        let projector = test_projector();
        let mut image = PosedRangeImage::new(16, 32);
        image.reset(Transformation3D::identity());
        let mut rng = rand::thread_rng();
        for row in 0..16 {
            for col in 0..32 {
                // Leave some pixels unknown.
                if rng.gen_bool(0.7) {
                    *image.image_mut().at_mut(row, col) = rng.gen_range(1.0..6.0);
                }
            }
        }
        let (min_range, max_range) = (0.5, 10.0);
        let intersector =
            RangeImageIntersector::<true>::new(&image, &projector, min_range, max_range);
        let origin = Point3D::new(0.0, 0.0, 0.0);
        let pose_inverse = Transformation3D::identity();

        for _ in 0..500 {
            let center = Point3D::new(
                rng.gen_range(-8.0..8.0),
                rng.gen_range(-8.0..8.0),
                rng.gen_range(-8.0..8.0),
            );
            let half_width = rng.gen_range(0.05..1.0);
            let aabb = cube_at(center, half_width);
            if intersector.determine_update_type(&aabb, &pose_inverse, &origin)
                != UpdateType::FullyUnobserved
            {
                continue;
            }

            // No point inside the AABB may be observable: it must be out
            // of range, project outside the image, or lie behind the
            // return of its pixel.
            for _ in 0..30 {
                let point = Point3D::new(
                    rng.gen_range(aabb.min.x..=aabb.max.x),
                    rng.gen_range(aabb.min.y..=aabb.max.y),
                    rng.gen_range(aabb.min.z..=aabb.max.z),
                );
                let coordinates = projector.cartesian_to_sensor(&point);
                if coordinates.depth < min_range || max_range < coordinates.depth {
                    continue;
                }
                let (pixel, _) = projector.image_to_nearest_index_and_offset(&coordinates.image);
                let Some(&range) = image.image().get(pixel) else {
                    continue;
                };
                if range < 1.0 {
                    // Unknown pixel.
                    continue;
                }
                assert!(
                    range < coordinates.depth + 1e-3,
                    "observable point {point} inside an AABB classified as fully unobserved \
                     (pixel range {range}, point depth {})",
                    coordinates.depth
                );
            }
        }
    }
}
