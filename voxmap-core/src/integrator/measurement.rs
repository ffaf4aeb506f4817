use crate::geometry::point::{FloatingPoint, Point3D};
use crate::integrator::hierarchical::RANGE_MIN;
use crate::integrator::intersector::UpdateType;
use crate::integrator::projection::Projector;
use crate::integrator::range_image::RangeImage;
use crate::utils::ConfigError;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeasurementModelConfig {
    /// Angular width of a beam, used to scale the coarse-update error bound.
    pub angle_sigma: FloatingPoint,
    /// Range uncertainty of a return. The occupancy window around a
    /// surface spans three sigmas on both sides.
    pub range_sigma: FloatingPoint,
    /// Magnitude of the log odds decrement applied to free space.
    pub scaling_free: FloatingPoint,
    /// Peak log odds increment applied at the measured surface.
    pub scaling_occupied: FloatingPoint,
}

impl Default for MeasurementModelConfig {
    fn default() -> Self {
        MeasurementModelConfig {
            angle_sigma: 0.05,
            range_sigma: 0.05,
            scaling_free: 0.2,
            scaling_occupied: 0.4,
        }
    }
}

impl MeasurementModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("angle_sigma", self.angle_sigma),
            ("range_sigma", self.range_sigma),
            ("scaling_free", self.scaling_free),
            ("scaling_occupied", self.scaling_occupied),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Log odds measurement likelihood of a single beam, evaluated per cell.
///
/// Cells well in front of the return get a constant free-space decrement,
/// cells within three range sigmas of the return get an occupancy
/// increment that peaks at the surface, and cells behind the return stay
/// untouched.
#[derive(Clone, Debug)]
pub struct MeasurementModel {
    config: MeasurementModelConfig,
    band_half_width: FloatingPoint,
}

impl MeasurementModel {
    pub fn new(config: MeasurementModelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(MeasurementModel {
            band_half_width: 3.0 * config.range_sigma,
            config,
        })
    }

    pub fn config(&self) -> &MeasurementModelConfig {
        &self.config
    }

    /// The log odds increment at a point in sensor coordinates, looked up
    /// against the beam that hits the point's image pixel.
    pub fn compute_update(
        &self,
        projector: &dyn Projector,
        range_image: &RangeImage,
        c_point: &Point3D,
    ) -> FloatingPoint {
        let coordinates = projector.cartesian_to_sensor(c_point);
        if coordinates.depth < 1e-3 {
            return 0.0;
        }
        let (pixel, _offset) = projector.image_to_nearest_index_and_offset(&coordinates.image);
        let Some(&beam_range) = range_image.get(pixel) else {
            return 0.0;
        };
        if beam_range < RANGE_MIN {
            // No return in this pixel.
            return 0.0;
        }
        self.compute_range_update(coordinates.depth, beam_range)
    }

    /// The update as a function of the cell range and the beam's return range.
    pub fn compute_range_update(
        &self,
        cell_range: FloatingPoint,
        beam_range: FloatingPoint,
    ) -> FloatingPoint {
        let w = self.band_half_width;
        let t = cell_range - beam_range;
        if t < -w {
            -self.config.scaling_free
        } else if t <= 0.0 {
            -self.config.scaling_free
                + (t + w) / w * (self.config.scaling_free + self.config.scaling_occupied)
        } else if t <= w {
            self.config.scaling_occupied * (1.0 - t / w)
        } else {
            0.0
        }
    }

    /// Upper bound on the per-cell log odds error made by treating a node
    /// as a single sample at its center.
    ///
    /// Non-increasing in the distance and non-decreasing in the bounding
    /// sphere radius. Possibly-occupied nodes always report the full
    /// update magnitude, forcing refinement down to the leaves around
    /// observed surfaces.
    pub fn compute_worst_case_approximation_error(
        &self,
        update_type: UpdateType,
        cell_to_sensor_distance: FloatingPoint,
        cell_bounding_radius: FloatingPoint,
    ) -> FloatingPoint {
        match update_type {
            UpdateType::FullyUnobserved => 0.0,
            UpdateType::FreeOrUnknown => {
                let worst_angle = cell_bounding_radius / cell_to_sensor_distance.max(1e-6);
                self.config.scaling_free * (worst_angle / self.config.angle_sigma).min(1.0)
            }
            UpdateType::PossiblyOccupied => {
                self.config.scaling_free + self.config.scaling_occupied
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MeasurementModel, MeasurementModelConfig};
    use crate::integrator::intersector::UpdateType;

    fn model() -> MeasurementModel {
        MeasurementModel::new(MeasurementModelConfig::default()).unwrap()
    }

    #[test]
    fn range_update_shape() {
        let model = model();
        // Deep inside free space.
        assert_eq!(model.compute_range_update(1.0, 2.0), -0.2);
        // At the surface the update peaks positive.
        assert!((model.compute_range_update(2.0, 2.0) - 0.4).abs() < 1e-6);
        // Just behind the surface it falls off.
        let behind = model.compute_range_update(2.1, 2.0);
        assert!(0.0 < behind && behind < 0.4);
        // Far behind the surface nothing changes.
        assert_eq!(model.compute_range_update(3.0, 2.0), 0.0);
    }

    #[test]
    fn worst_case_error_monotonicity() {
        let model = model();
        let near = model.compute_worst_case_approximation_error(
            UpdateType::FreeOrUnknown,
            1.0,
            0.1,
        );
        let far = model.compute_worst_case_approximation_error(
            UpdateType::FreeOrUnknown,
            10.0,
            0.1,
        );
        let big = model.compute_worst_case_approximation_error(
            UpdateType::FreeOrUnknown,
            1.0,
            0.5,
        );
        assert!(far <= near);
        assert!(near <= big);
        assert_eq!(
            model.compute_worst_case_approximation_error(UpdateType::FullyUnobserved, 1.0, 0.1),
            0.0
        );
        // Possibly occupied nodes always exceed reasonable termination
        // thresholds, so they refine to the leaf level.
        let occupied = model.compute_worst_case_approximation_error(
            UpdateType::PossiblyOccupied,
            100.0,
            0.01,
        );
        assert!(occupied > 0.5);
    }
}
