use crate::messages::{self, PointcloudMessage, TopicType};
use crate::pipeline::Pipeline;
use crate::stopwatch::Stopwatch;
use log::{debug, warn};
use std::collections::VecDeque;
use voxmap_core::pointcloud::{Pointcloud, PosedPointcloud};
use voxmap_core::undistortion::{
    PointcloudUndistorter, StampedPointcloud, TransformBuffer, UndistortionError,
};
use voxmap_core::utils::ConfigError;

#[derive(Debug, Clone)]
pub struct PointcloudInputConfig {
    pub topic_name: String,
    pub topic_type: TopicType,
    /// Maximum number of pointclouds buffered while waiting for poses.
    pub topic_queue_length: usize,
    /// Names of the integrator pipeline stages to invoke per cloud.
    pub measurement_integrator_names: Vec<String>,
    /// Tick period for `process_queue`, in seconds.
    pub processing_retry_period: f32,
    /// Clouds older than this relative to the newest queued cloud are
    /// dropped instead of waiting for their pose, in seconds.
    pub max_wait_for_pose: f32,
    /// Overrides the frame id from the message header.
    pub sensor_frame_id: Option<String>,
    /// Added to the message timestamps, in seconds.
    pub time_offset: f32,
    pub undistort_motion: bool,
    pub num_undistortion_interpolation_intervals_per_cloud: usize,
}

impl Default for PointcloudInputConfig {
    fn default() -> Self {
        PointcloudInputConfig {
            topic_name: String::new(),
            topic_type: TopicType::PointCloud2,
            topic_queue_length: 10,
            measurement_integrator_names: Vec::new(),
            processing_retry_period: 0.05,
            max_wait_for_pose: 1.0,
            sensor_frame_id: None,
            time_offset: 0.0,
            undistort_motion: false,
            num_undistortion_interpolation_intervals_per_cloud: 100,
        }
    }
}

impl PointcloudInputConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic_name.is_empty() {
            return Err(ConfigError("topic_name must not be empty".to_string()));
        }
        if self.topic_queue_length == 0 {
            return Err(ConfigError("topic_queue_length must be > 0".to_string()));
        }
        if self.measurement_integrator_names.is_empty() {
            return Err(ConfigError(
                "measurement_integrator_names must not be empty".to_string(),
            ));
        }
        if !(self.processing_retry_period > 0.0) {
            return Err(ConfigError(
                "processing_retry_period must be > 0".to_string(),
            ));
        }
        if !(self.max_wait_for_pose >= 0.0) {
            return Err(ConfigError("max_wait_for_pose must be >= 0".to_string()));
        }
        if self.num_undistortion_interpolation_intervals_per_cloud == 0 {
            return Err(ConfigError(
                "num_undistortion_interpolation_intervals_per_cloud must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

enum QueueAction {
    /// Leave the head in the queue and retry on the next tick.
    Retry,
    /// Drop the head without integrating it.
    Drop,
    Integrate(PosedPointcloud),
}

/// Per-sensor FIFO of stamped pointclouds, drained front to back once
/// their poses become available.
pub struct PointcloudInput {
    config: PointcloudInputConfig,
    world_frame: String,
    queue: VecDeque<StampedPointcloud>,
    undistorter: PointcloudUndistorter,
    integration_stopwatch: Stopwatch,
}

impl PointcloudInput {
    pub fn new(config: PointcloudInputConfig, world_frame: String) -> Result<Self, ConfigError> {
        config.validate()?;
        let undistorter = PointcloudUndistorter::new(
            config.num_undistortion_interpolation_intervals_per_cloud,
        );
        Ok(PointcloudInput {
            config,
            world_frame,
            queue: VecDeque::new(),
            undistorter,
            integration_stopwatch: Stopwatch::new(),
        })
    }

    pub fn config(&self) -> &PointcloudInputConfig {
        &self.config
    }

    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    /// Decodes a packed pointcloud message and adds it to the queue.
    /// Malformed messages are dropped with a warning.
    pub fn enqueue_message(&mut self, message: &PointcloudMessage) {
        let time_offset_nsec = (self.config.time_offset as f64 * 1e9) as i64;
        match messages::stamped_pointcloud_from_message(
            message,
            self.config.topic_type,
            self.config.sensor_frame_id.as_deref(),
            time_offset_nsec,
            self.config.undistort_motion,
        ) {
            Ok(stamped_pointcloud) => self.enqueue(stamped_pointcloud),
            Err(error) => warn!("Dropping pointcloud message: {error}."),
        }
    }

    pub fn enqueue(&mut self, stamped_pointcloud: StampedPointcloud) {
        if self.queue.len() >= self.config.topic_queue_length {
            warn!("Pointcloud queue is full; dropping the oldest cloud.");
            self.queue.pop_front();
        }
        self.queue.push_back(stamped_pointcloud);
    }

    /// Drains the queue front to back. Stops early when the head's end
    /// pose is not yet available, so it can be retried on the next tick.
    pub fn process_queue(&mut self, transform_buffer: &dyn TransformBuffer, pipeline: &mut Pipeline) {
        loop {
            let action = self.next_action(transform_buffer);
            match action {
                None => break,
                Some(QueueAction::Retry) => return,
                Some(QueueAction::Drop) => {
                    self.queue.pop_front();
                }
                Some(QueueAction::Integrate(posed_pointcloud)) => {
                    debug!(
                        "Inserting pointcloud with {} points. Remaining pointclouds in queue: {}.",
                        posed_pointcloud.len(),
                        self.queue.len().saturating_sub(1)
                    );
                    self.integration_stopwatch.start();
                    pipeline.run(&self.config.measurement_integrator_names, &posed_pointcloud);
                    self.integration_stopwatch.stop();
                    debug!(
                        "Integrated new pointcloud in {:.3}s. Total integration time: {:.3}s.",
                        self.integration_stopwatch.last_episode_duration().as_secs_f64(),
                        self.integration_stopwatch.total_duration().as_secs_f64()
                    );
                    self.queue.pop_front();
                }
            }
        }
    }

    fn next_action(&self, transform_buffer: &dyn TransformBuffer) -> Option<QueueAction> {
        let oldest = self.queue.front()?;
        let newest_end_time = self.queue.back().map_or(0, |cloud| cloud.end_time());

        // Drop clouds whose pose we have waited too long for.
        let waited_seconds =
            newest_end_time.saturating_sub(oldest.start_time()) as f64 * 1e-9;
        if (self.config.max_wait_for_pose as f64) < waited_seconds {
            warn!(
                "Max waiting time of {}s exceeded for pointcloud with frame \"{}\" and time \
                 interval [{}, {}] vs newest cloud end time {}. Dropping cloud.",
                self.config.max_wait_for_pose,
                oldest.sensor_frame(),
                oldest.start_time(),
                oldest.end_time(),
                newest_end_time
            );
            return Some(QueueAction::Drop);
        }

        if self.config.undistort_motion {
            match self
                .undistorter
                .undistort(oldest, &self.world_frame, transform_buffer)
            {
                Ok(posed_pointcloud) => Some(QueueAction::Integrate(posed_pointcloud)),
                // The end pose may still arrive; retry at the next tick.
                Err(UndistortionError::EndTimeNotInBuffer) => Some(QueueAction::Retry),
                Err(UndistortionError::StartTimeNotInBuffer) => {
                    warn!(
                        "Pointcloud end pose is available but the start pose at time {} is not \
                         (or no longer). Skipping pointcloud.",
                        oldest.start_time()
                    );
                    Some(QueueAction::Drop)
                }
                Err(UndistortionError::IntermediateTimeNotInBuffer) => {
                    warn!(
                        "Could not buffer all transforms for pointcloud spanning time interval \
                         [{}, {}]. This should never happen. Skipping pointcloud.",
                        oldest.start_time(),
                        oldest.end_time()
                    );
                    Some(QueueAction::Drop)
                }
            }
        } else {
            let Some(pose) = transform_buffer.lookup_transform(
                &self.world_frame,
                oldest.sensor_frame(),
                oldest.time_base(),
            ) else {
                return Some(QueueAction::Retry);
            };
            let points: Pointcloud = oldest
                .points()
                .iter()
                .map(|point| point.position)
                .collect();
            Some(QueueAction::Integrate(PosedPointcloud::new(pose, points)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PointcloudInput, PointcloudInputConfig};
    use crate::messages::TopicType;
    use crate::pipeline::Pipeline;
    use crate::transform_buffer::InterpolatingTransformBuffer;
    use std::f32::consts::{FRAC_PI_4, PI};
    use std::sync::Arc;
    use voxmap_core::geometry::grid::GridIndex;
    use voxmap_core::geometry::point::Transformation3D;
    use voxmap_core::integrator::measurement::MeasurementModelConfig;
    use voxmap_core::integrator::projection::{SphericalProjector, SphericalProjectorConfig};
    use voxmap_core::integrator::projective::{
        ProjectiveIntegrator, ProjectiveIntegratorConfig,
    };
    use voxmap_core::map::hashed_wavelet_octree::{HashedWaveletOctree, MapConfig};
    use voxmap_core::undistortion::StampedPointcloud;
    use voxmap_core::utils::thread_pool::ThreadPool;

    fn test_pipeline() -> Pipeline {
        let projector = SphericalProjector::new(SphericalProjectorConfig {
            elevation_min: -FRAC_PI_4,
            elevation_max: FRAC_PI_4,
            num_rows: 32,
            azimuth_min: -PI,
            azimuth_max: PI,
            num_cols: 64,
        })
        .unwrap();
        let integrator = ProjectiveIntegrator::new(
            ProjectiveIntegratorConfig {
                min_range: 0.5,
                max_range: 10.0,
                ..ProjectiveIntegratorConfig::default()
            },
            Box::new(projector),
            MeasurementModelConfig::default(),
            Arc::new(ThreadPool::new(2)),
        )
        .unwrap();
        let mut pipeline = Pipeline::new(
            HashedWaveletOctree::new(MapConfig {
                min_cell_width: 0.1,
                tree_height: 4,
                ..MapConfig::default()
            })
            .into(),
        );
        pipeline.add_integrator("lidar", integrator);
        pipeline
    }

    fn test_config() -> PointcloudInputConfig {
        PointcloudInputConfig {
            topic_name: "points".to_string(),
            topic_type: TopicType::Ouster,
            measurement_integrator_names: vec!["lidar".to_string()],
            undistort_motion: true,
            num_undistortion_interpolation_intervals_per_cloud: 10,
            ..PointcloudInputConfig::default()
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
    fn config_validation() {
        assert!(test_config().validate().is_ok());
        assert!(PointcloudInputConfig::default().validate().is_err());
        assert!(PointcloudInputConfig {
            topic_queue_length: 0,
            ..test_config()
        }
        .validate()
        .is_err());
        assert!(PointcloudInputConfig {
            max_wait_for_pose: -1.0,
            ..test_config()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn cloud_is_retried_until_the_end_pose_arrives() {
        let mut input = PointcloudInput::new(test_config(), "world".to_string()).unwrap();
        let mut pipeline = test_pipeline();
        let mut buffer = InterpolatingTransformBuffer::new();

        input.enqueue(test_cloud());

        // The transform buffer is still empty: the cloud stays queued.
        input.process_queue(&buffer, &mut pipeline);
        assert_eq!(input.queue_length(), 1);
        assert!(pipeline.map().empty());

        // Once the buffer covers the whole capture interval, the cloud is
        // undistorted and integrated.
        buffer.add("world", "lidar", 900_000_000, Transformation3D::identity());
        buffer.add("world", "lidar", 1_100_000_000, Transformation3D::identity());
        input.process_queue(&buffer, &mut pipeline);
        assert_eq!(input.queue_length(), 0);
        assert!(!pipeline.map().empty());

        // All three points sit at (1, 0, 0) in the world frame, so the
        // containing cell ends up occupied.
        let occupied = pipeline.map().get_cell_value(GridIndex::new(10, 0, 0));
        assert!(occupied > 0.0, "expected an occupied surface cell, got {occupied}");
    }

    #[test]
    fn stale_clouds_are_dropped() {
        let config = PointcloudInputConfig {
            max_wait_for_pose: 0.5,
            ..test_config()
        };
        let mut input = PointcloudInput::new(config, "world".to_string()).unwrap();
        let mut pipeline = test_pipeline();
        let buffer = InterpolatingTransformBuffer::new();

        input.enqueue(test_cloud());
        let mut newer = StampedPointcloud::new(3_000_000_000, "lidar".to_string(), 1);
        newer.push(1.0, 0.0, 0.0, 0);
        input.enqueue(newer);

        // The old cloud exceeded the staleness bound and is dropped; the
        // newer one keeps waiting for its pose.
        input.process_queue(&buffer, &mut pipeline);
        assert_eq!(input.queue_length(), 1);
        assert!(pipeline.map().empty());
    }

    #[test]
    fn queue_length_is_bounded() {
        let config = PointcloudInputConfig {
            topic_queue_length: 2,
            ..test_config()
        };
        let mut input = PointcloudInput::new(config, "world".to_string()).unwrap();
        for _ in 0..5 {
            input.enqueue(test_cloud());
        }
        assert_eq!(input.queue_length(), 2);
    }
}
