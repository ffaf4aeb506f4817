use crate::geometry::point::{FloatingPoint, Point3D, Transformation3D};
use crate::pointcloud::{Pointcloud, PosedPointcloud};
use nalgebra::Translation3;
use thiserror::Error;

/// A measured point together with its capture time, in nanoseconds
/// relative to the pointcloud's time base.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StampedPoint {
    pub position: Point3D,
    pub time_offset: u32,
}

/// A pointcloud whose points carry per-point capture times.
#[derive(Clone, Debug)]
pub struct StampedPointcloud {
    time_base: u64,
    sensor_frame: String,
    points: Vec<StampedPoint>,
    min_time_offset: u32,
    max_time_offset: u32,
}

impl StampedPointcloud {
    pub fn new(time_base: u64, sensor_frame: String, capacity: usize) -> Self {
        StampedPointcloud {
            time_base,
            sensor_frame,
            points: Vec::with_capacity(capacity),
            min_time_offset: u32::MAX,
            max_time_offset: 0,
        }
    }

    pub fn push(&mut self, x: FloatingPoint, y: FloatingPoint, z: FloatingPoint, time_offset: u32) {
        self.min_time_offset = self.min_time_offset.min(time_offset);
        self.max_time_offset = self.max_time_offset.max(time_offset);
        self.points.push(StampedPoint {
            position: Point3D::new(x, y, z),
            time_offset,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[StampedPoint] {
        &self.points
    }

    pub fn sensor_frame(&self) -> &str {
        &self.sensor_frame
    }

    pub fn time_base(&self) -> u64 {
        self.time_base
    }

    /// Capture time of the earliest point.
    pub fn start_time(&self) -> u64 {
        if self.points.is_empty() {
            return self.time_base;
        }
        self.time_base + self.min_time_offset as u64
    }

    /// Capture time of the latest point.
    pub fn end_time(&self) -> u64 {
        if self.points.is_empty() {
            return self.time_base;
        }
        self.time_base + self.max_time_offset as u64
    }

    /// Median capture time over all points.
    pub fn median_time(&self) -> u64 {
        if self.points.is_empty() {
            return self.time_base;
        }
        let mut offsets: Vec<u32> = self.points.iter().map(|p| p.time_offset).collect();
        offsets.sort_unstable();
        self.time_base + offsets[offsets.len() / 2] as u64
    }
}

/// Lookup contract for externally owned pose histories.
///
/// Implementations must return `None` whenever the requested time lies
/// outside the buffered window on either side, and must be safe to call
/// from multiple threads at once.
pub trait TransformBuffer: Send + Sync {
    /// The pose of `source_frame` expressed in `target_frame` at the
    /// given time.
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time_nsec: u64,
    ) -> Option<Transformation3D>;
}

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum UndistortionError {
    /// The pose at the pointcloud's end time is not yet available.
    /// The caller should retry once newer transforms have arrived.
    #[error("pointcloud end time is not in the transform buffer yet")]
    EndTimeNotInBuffer,

    /// The pose at the pointcloud's start time has already aged out of
    /// the buffer. The caller should drop the pointcloud.
    #[error("pointcloud start time is no longer in the transform buffer")]
    StartTimeNotInBuffer,

    /// A pose between the start and end time is missing even though both
    /// endpoints are available. Should never happen with a well-behaved
    /// transform buffer.
    #[error("an intermediate pointcloud time is missing from the transform buffer")]
    IntermediateTimeNotInBuffer,
}

/// Linear interpolation of the translation and spherical interpolation of
/// the rotation between two poses.
pub fn interpolate_poses(
    from: &Transformation3D,
    to: &Transformation3D,
    fraction: FloatingPoint,
) -> Transformation3D {
    let translation = from
        .translation
        .vector
        .lerp(&to.translation.vector, fraction);
    let rotation = from
        .rotation
        .try_slerp(&to.rotation, fraction, 1e-9)
        .unwrap_or(to.rotation);
    Transformation3D::from_parts(Translation3::from(translation), rotation)
}

/// Compensates for sensor motion during a single scan by transforming
/// each point with the interpolated pose at its capture time.
#[derive(Clone, Debug)]
pub struct PointcloudUndistorter {
    num_interpolation_intervals: usize,
}

impl PointcloudUndistorter {
    pub fn new(num_interpolation_intervals: usize) -> Self {
        debug_assert!(num_interpolation_intervals > 0);
        PointcloudUndistorter {
            num_interpolation_intervals,
        }
    }

    /// Undistorts the given stamped pointcloud into the world frame.
    ///
    /// On success the returned pointcloud carries the pose at the cloud's
    /// median time, and all points are stored relative to that pose.
    pub fn undistort(
        &self,
        stamped_pointcloud: &StampedPointcloud,
        world_frame: &str,
        transform_buffer: &dyn TransformBuffer,
    ) -> Result<PosedPointcloud, UndistortionError> {
        let t_start = stamped_pointcloud.start_time();
        let t_end = stamped_pointcloud.end_time();
        let sensor_frame = stamped_pointcloud.sensor_frame();
        let num_intervals = self.num_interpolation_intervals as u64;

        let sample_time = |k: u64| {
            if t_end == t_start {
                t_start
            } else {
                t_start + (t_end - t_start) * k / num_intervals
            }
        };

        // Check the interval endpoints first, so that the caller can
        // distinguish "pose not yet available" from "pose aged out".
        let pose_end = transform_buffer
            .lookup_transform(world_frame, sensor_frame, t_end)
            .ok_or(UndistortionError::EndTimeNotInBuffer)?;
        let pose_start = transform_buffer
            .lookup_transform(world_frame, sensor_frame, t_start)
            .ok_or(UndistortionError::StartTimeNotInBuffer)?;

        let mut sample_poses = Vec::with_capacity(self.num_interpolation_intervals + 1);
        sample_poses.push(pose_start);
        for k in 1..num_intervals {
            let pose = transform_buffer
                .lookup_transform(world_frame, sensor_frame, sample_time(k))
                .ok_or(UndistortionError::IntermediateTimeNotInBuffer)?;
            sample_poses.push(pose);
        }
        sample_poses.push(pose_end);

        // Pose at a given capture time, interpolated between the two
        // enclosing samples.
        let pose_at = |time: u64| {
            if t_end == t_start {
                return sample_poses[0];
            }
            let span = t_end - t_start;
            let elapsed = time.saturating_sub(t_start).min(span);
            let interval = ((elapsed * num_intervals) / span).min(num_intervals - 1);
            let interval_start = sample_time(interval);
            let interval_end = sample_time(interval + 1);
            let fraction = if interval_end == interval_start {
                0.0
            } else {
                (time - interval_start) as FloatingPoint
                    / (interval_end - interval_start) as FloatingPoint
            };
            interpolate_poses(
                &sample_poses[interval as usize],
                &sample_poses[interval as usize + 1],
                fraction,
            )
        };

        let reference_pose = pose_at(stamped_pointcloud.median_time());
        let reference_pose_inverse = reference_pose.inverse();

        let time_base = stamped_pointcloud.time_base();
        let points = stamped_pointcloud
            .points()
            .iter()
            .map(|point| {
                let t_point = time_base + point.time_offset as u64;
                let world_point = pose_at(t_point) * point.position;
                reference_pose_inverse * world_point
            })
            .collect::<Pointcloud>();

        Ok(PosedPointcloud::new(reference_pose, points))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PointcloudUndistorter, StampedPointcloud, TransformBuffer, UndistortionError,
    };
    use crate::geometry::point::{Point3D, Transformation3D, Vector3D};

    struct ConstantBuffer {
        pose: Transformation3D,
    }

    impl TransformBuffer for ConstantBuffer {
        fn lookup_transform(&self, _: &str, _: &str, _: u64) -> Option<Transformation3D> {
            Some(self.pose)
        }
    }

    struct EmptyBuffer;

    impl TransformBuffer for EmptyBuffer {
        fn lookup_transform(&self, _: &str, _: &str, _: u64) -> Option<Transformation3D> {
            None
        }
    }

    fn test_cloud() -> StampedPointcloud {
        let mut cloud = StampedPointcloud::new(1_000_000_000, "lidar".to_string(), 3);
        cloud.push(1.0, 0.0, 0.0, 0);
        cloud.push(1.0, 0.0, 0.0, 10_000_000);
        cloud.push(1.0, 0.0, 0.0, 20_000_000);
        cloud
    }

    #[test]
    fn time_accessors() {
        let cloud = test_cloud();
        assert_eq!(cloud.start_time(), 1_000_000_000);
        assert_eq!(cloud.end_time(), 1_020_000_000);
        assert_eq!(cloud.median_time(), 1_010_000_000);
    }

    #[test]
    fn constant_pose_is_idempotent() {
        let pose = Transformation3D::new(
            Vector3D::new(2.0, -1.0, 0.5),
            Vector3D::new(0.0, 0.0, 0.3),
        );
        let buffer = ConstantBuffer { pose };
        let undistorter = PointcloudUndistorter::new(10);

        let result = undistorter.undistort(&test_cloud(), "world", &buffer).unwrap();
        assert_eq!(result.len(), 3);
        for (local, global) in result.points_local().iter().zip(result.points_global()) {
            // With a constant pose, local points come out unchanged and the
            // global points are simply T * p.
            assert!((local - Point3D::new(1.0, 0.0, 0.0)).norm() < 1e-5);
            assert!((global - pose * Point3D::new(1.0, 0.0, 0.0)).norm() < 1e-5);
        }
    }

    #[test]
    fn missing_end_transform_is_reported() {
        let undistorter = PointcloudUndistorter::new(10);
        let result = undistorter.undistort(&test_cloud(), "world", &EmptyBuffer);
        assert_eq!(result.unwrap_err(), UndistortionError::EndTimeNotInBuffer);
    }

    #[test]
    fn moving_sensor_corrects_points() {
        // Sensor moves 1 m along x over the scan; all points measured at
        // (1, 0, 0) in the sensor frame.
        struct MovingBuffer;
        impl TransformBuffer for MovingBuffer {
            fn lookup_transform(&self, _: &str, _: &str, t: u64) -> Option<Transformation3D> {
                let dt = (t.saturating_sub(1_000_000_000)) as f32 / 20_000_000.0;
                Some(Transformation3D::new(
                    Vector3D::new(dt, 0.0, 0.0),
                    Vector3D::zeros(),
                ))
            }
        }

        let undistorter = PointcloudUndistorter::new(10);
        let result = undistorter
            .undistort(&test_cloud(), "world", &MovingBuffer)
            .unwrap();

        // In the world frame the three points land at x = 1.0, 1.5, 2.0.
        let global = result.points_global();
        assert!((global[0].x - 1.0).abs() < 1e-4);
        assert!((global[1].x - 1.5).abs() < 1e-4);
        assert!((global[2].x - 2.0).abs() < 1e-4);
        // The reference pose is the one at the median time.
        assert!((result.pose().translation.vector.x - 0.5).abs() < 1e-4);
    }
}
