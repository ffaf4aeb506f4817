use log::warn;
use std::collections::{HashMap, VecDeque};
use voxmap_core::geometry::point::Transformation3D;
use voxmap_core::undistortion::{interpolate_poses, TransformBuffer};

/// A pose history per (parent, child) frame pair with linear/spherical
/// interpolation between buffered stamps.
///
/// Lookups outside the buffered window return `None` on either side, so
/// callers can distinguish "wait for newer transforms" from "aged out"
/// by which endpoint of their query interval fails first.
#[derive(Debug, Default)]
pub struct InterpolatingTransformBuffer {
    buffer: HashMap<(String, String), VecDeque<(u64, Transformation3D)>>,
}

impl InterpolatingTransformBuffer {
    pub fn new() -> Self {
        InterpolatingTransformBuffer::default()
    }

    /// Appends a transform of `child_frame` relative to `parent_frame`.
    /// Out-of-order stamps are dropped.
    pub fn add(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        stamp_nsec: u64,
        pose: Transformation3D,
    ) {
        let queue = self
            .buffer
            .entry((parent_frame.to_string(), child_frame.to_string()))
            .or_default();
        if queue.back().is_some_and(|(stamp, _)| stamp_nsec < *stamp) {
            warn!("Out-of-order transform for frame \"{child_frame}\"; dropping it.");
            return;
        }
        queue.push_back((stamp_nsec, pose));
    }

    /// Drops buffered transforms older than the given stamp, always
    /// keeping one so that lookups at the stamp itself stay answerable.
    pub fn cleanup_before(&mut self, stamp_nsec: u64) {
        for queue in self.buffer.values_mut() {
            while queue.len() > 1 {
                let Some(&(second_stamp, _)) = queue.get(1) else {
                    break;
                };
                if second_stamp <= stamp_nsec {
                    queue.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    fn lookup_in_queue(
        queue: &VecDeque<(u64, Transformation3D)>,
        time_nsec: u64,
    ) -> Option<Transformation3D> {
        let &(front_stamp, front_pose) = queue.front()?;
        if time_nsec < front_stamp {
            return None;
        }
        if time_nsec == front_stamp {
            return Some(front_pose);
        }
        let after_index = queue
            .iter()
            .position(|&(stamp, _)| time_nsec <= stamp)?;
        let (after_stamp, after_pose) = queue[after_index];
        let (before_stamp, before_pose) = queue[after_index - 1];
        let fraction =
            (time_nsec - before_stamp) as f32 / (after_stamp - before_stamp) as f32;
        Some(interpolate_poses(&before_pose, &after_pose, fraction))
    }
}

impl TransformBuffer for InterpolatingTransformBuffer {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time_nsec: u64,
    ) -> Option<Transformation3D> {
        if target_frame == source_frame {
            return Some(Transformation3D::identity());
        }
        if let Some(queue) = self
            .buffer
            .get(&(target_frame.to_string(), source_frame.to_string()))
        {
            return Self::lookup_in_queue(queue, time_nsec);
        }
        if let Some(queue) = self
            .buffer
            .get(&(source_frame.to_string(), target_frame.to_string()))
        {
            return Self::lookup_in_queue(queue, time_nsec).map(|pose| pose.inverse());
        }
        None
    }
}
