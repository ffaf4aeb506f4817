use crate::geometry::point::{FloatingPoint, PixelIndex, Point3D, Vector2D};
use crate::utils::ConfigError;

/// A point expressed in sensor coordinates: continuous image coordinates
/// plus the projection-specific depth (beam range for LiDAR, z depth for
/// cameras).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SensorCoordinates {
    pub image: Vector2D,
    pub depth: FloatingPoint,
}

/// Maps between cartesian sensor-frame points and image coordinates.
pub trait Projector: Send + Sync {
    /// Image dimensions as (rows, cols).
    fn dimensions(&self) -> PixelIndex;

    fn cartesian_to_sensor(&self, point: &Point3D) -> SensorCoordinates;

    /// The scalar compared against range image values for depth tests.
    fn cartesian_to_sensor_z(&self, point: &Point3D) -> FloatingPoint;

    /// Continuous pixel position of the given image coordinates. Integer
    /// values correspond to pixel centers.
    fn image_to_float_index(&self, image: &Vector2D) -> Vector2D;

    /// True if the horizontal image axis is cyclic (azimuth wrapping at
    /// +-pi), so that pixel intervals may wrap around the image border.
    fn azimuth_wraps_around_pi(&self) -> bool;

    /// Nearest pixel plus the sub-pixel offset of the exact projection,
    /// in pixel units.
    fn image_to_nearest_index_and_offset(&self, image: &Vector2D) -> (PixelIndex, Vector2D) {
        let float_index = self.image_to_float_index(image);
        let nearest = PixelIndex::new(
            float_index.x.round() as i32,
            float_index.y.round() as i32,
        );
        let offset = Vector2D::new(
            float_index.x - nearest.x as FloatingPoint,
            float_index.y - nearest.y as FloatingPoint,
        );
        (nearest, offset)
    }
}

/// Projection model for rotating LiDARs: rows bin the elevation angle,
/// columns the azimuth angle, and depth is the Euclidean beam range.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SphericalProjectorConfig {
    pub elevation_min: FloatingPoint,
    pub elevation_max: FloatingPoint,
    pub num_rows: usize,
    pub azimuth_min: FloatingPoint,
    pub azimuth_max: FloatingPoint,
    pub num_cols: usize,
}

impl Default for SphericalProjectorConfig {
    fn default() -> Self {
        SphericalProjectorConfig {
            elevation_min: -std::f32::consts::FRAC_PI_8,
            elevation_max: std::f32::consts::FRAC_PI_8,
            num_rows: 64,
            azimuth_min: -std::f32::consts::PI,
            azimuth_max: std::f32::consts::PI,
            num_cols: 1024,
        }
    }
}

impl SphericalProjectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.elevation_min >= self.elevation_max {
            return Err(ConfigError(
                "elevation_min must be smaller than elevation_max".to_string(),
            ));
        }
        if self.azimuth_min >= self.azimuth_max {
            return Err(ConfigError(
                "azimuth_min must be smaller than azimuth_max".to_string(),
            ));
        }
        if self.num_rows == 0 || self.num_cols == 0 {
            return Err(ConfigError("image dimensions must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SphericalProjector {
    config: SphericalProjectorConfig,
    elevation_step_inv: FloatingPoint,
    azimuth_step_inv: FloatingPoint,
}

impl SphericalProjector {
    pub fn new(config: SphericalProjectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(SphericalProjector {
            elevation_step_inv: config.num_rows as FloatingPoint
                / (config.elevation_max - config.elevation_min),
            azimuth_step_inv: config.num_cols as FloatingPoint
                / (config.azimuth_max - config.azimuth_min),
            config,
        })
    }

    pub fn config(&self) -> &SphericalProjectorConfig {
        &self.config
    }
}

impl Projector for SphericalProjector {
    fn dimensions(&self) -> PixelIndex {
        PixelIndex::new(self.config.num_rows as i32, self.config.num_cols as i32)
    }

    fn cartesian_to_sensor(&self, point: &Point3D) -> SensorCoordinates {
        let range = point.coords.norm();
        let elevation = point.z.atan2((point.x * point.x + point.y * point.y).sqrt());
        let azimuth = point.y.atan2(point.x);
        SensorCoordinates {
            image: Vector2D::new(elevation, azimuth),
            depth: range,
        }
    }

    fn cartesian_to_sensor_z(&self, point: &Point3D) -> FloatingPoint {
        point.coords.norm()
    }

    fn image_to_float_index(&self, image: &Vector2D) -> Vector2D {
        Vector2D::new(
            (image.x - self.config.elevation_min) * self.elevation_step_inv - 0.5,
            (image.y - self.config.azimuth_min) * self.azimuth_step_inv - 0.5,
        )
    }

    fn azimuth_wraps_around_pi(&self) -> bool {
        // Wrap when the azimuth axis spans the full circle.
        (self.config.azimuth_max - self.config.azimuth_min - std::f32::consts::TAU).abs() < 1e-4
    }
}

/// Pinhole camera projection for depth images: depth is the z coordinate.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PinholeProjectorConfig {
    pub num_rows: usize,
    pub num_cols: usize,
    pub fx: FloatingPoint,
    pub fy: FloatingPoint,
    pub cx: FloatingPoint,
    pub cy: FloatingPoint,
}

impl PinholeProjectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_rows == 0 || self.num_cols == 0 {
            return Err(ConfigError("image dimensions must be positive".to_string()));
        }
        if !(self.fx > 0.0) || !(self.fy > 0.0) {
            return Err(ConfigError("focal lengths must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PinholeProjector {
    config: PinholeProjectorConfig,
}

impl PinholeProjector {
    pub fn new(config: PinholeProjectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(PinholeProjector { config })
    }
}

impl Projector for PinholeProjector {
    fn dimensions(&self) -> PixelIndex {
        PixelIndex::new(self.config.num_rows as i32, self.config.num_cols as i32)
    }

    fn cartesian_to_sensor(&self, point: &Point3D) -> SensorCoordinates {
        let z = point.z;
        let inv_z = if z.abs() < 1e-6 { 0.0 } else { 1.0 / z };
        SensorCoordinates {
            image: Vector2D::new(
                self.config.fy * point.y * inv_z + self.config.cy,
                self.config.fx * point.x * inv_z + self.config.cx,
            ),
            depth: z,
        }
    }

    fn cartesian_to_sensor_z(&self, point: &Point3D) -> FloatingPoint {
        point.z
    }

    fn image_to_float_index(&self, image: &Vector2D) -> Vector2D {
        // Pinhole image coordinates are already in pixel units.
        *image
    }

    fn azimuth_wraps_around_pi(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PinholeProjector, PinholeProjectorConfig, Projector, SphericalProjector,
        SphericalProjectorConfig,
    };
    use crate::geometry::point::{Point3D, Vector2D};
    use std::f32::consts::{FRAC_PI_4, PI};

    fn test_projector() -> SphericalProjector {
        SphericalProjector::new(SphericalProjectorConfig {
            elevation_min: -FRAC_PI_4,
            elevation_max: FRAC_PI_4,
            num_rows: 8,
            azimuth_min: -PI,
            azimuth_max: PI,
            num_cols: 16,
        })
        .unwrap()
    }

    #[test]
    fn spherical_projection_of_axis_points() {
        let projector = test_projector();

        let forward = projector.cartesian_to_sensor(&Point3D::new(2.0, 0.0, 0.0));
        assert!((forward.depth - 2.0).abs() < 1e-6);
        assert!(forward.image.x.abs() < 1e-6);
        assert!(forward.image.y.abs() < 1e-6);

        let left = projector.cartesian_to_sensor(&Point3D::new(0.0, 1.0, 0.0));
        assert!((left.image.y - PI / 2.0).abs() < 1e-6);

        let up = projector.cartesian_to_sensor(&Point3D::new(1.0, 0.0, 1.0));
        assert!((up.image.x - FRAC_PI_4).abs() < 1e-6);
    }

    #[test]
    fn spherical_nearest_index() {
        let projector = test_projector();
        // Straight ahead lands in the middle of the image.
        let coords = projector.cartesian_to_sensor(&Point3D::new(1.0, 0.0, 0.0));
        let (pixel, offset) = projector.image_to_nearest_index_and_offset(&coords.image);
        // Elevation 0 sits between rows 3 and 4; azimuth 0 between cols 7 and 8.
        assert!(pixel.x == 3 || pixel.x == 4);
        assert!(pixel.y == 7 || pixel.y == 8);
        assert!(offset.x.abs() <= 0.5 + 1e-6);
        assert!(offset.y.abs() <= 0.5 + 1e-6);
    }

    #[test]
    fn spherical_wrap_detection() {
        assert!(test_projector().azimuth_wraps_around_pi());
        let partial = SphericalProjector::new(SphericalProjectorConfig {
            azimuth_min: -1.0,
            azimuth_max: 1.0,
            ..SphericalProjectorConfig::default()
        })
        .unwrap();
        assert!(!partial.azimuth_wraps_around_pi());
    }

    #[test]
    fn pinhole_projection() {
        let projector = PinholeProjector::new(PinholeProjectorConfig {
            num_rows: 480,
            num_cols: 640,
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        })
        .unwrap();

        let coords = projector.cartesian_to_sensor(&Point3D::new(0.0, 0.0, 2.0));
        assert_eq!(coords.depth, 2.0);
        assert_eq!(coords.image, Vector2D::new(240.0, 320.0));

        let off_center = projector.cartesian_to_sensor(&Point3D::new(0.4, -0.2, 2.0));
        assert!((off_center.image.y - 420.0).abs() < 1e-4);
        assert!((off_center.image.x - 190.0).abs() < 1e-4);
    }
}
