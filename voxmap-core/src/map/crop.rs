use crate::geometry::octree_index::{convert, OctreeIndex};
use crate::geometry::point::{FloatingPoint, Point3D};
use crate::map::variant::Map;
use crate::undistortion::TransformBuffer;
use crate::utils::ConfigError;
use log::warn;

#[derive(Clone, Debug)]
pub struct CropConfig {
    /// Minimum time between crop runs, in seconds.
    pub once_every: FloatingPoint,
    /// Frame whose origin the crop distance is measured from.
    pub body_frame: String,
    pub remove_blocks_beyond_distance: FloatingPoint,
}

impl CropConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.once_every > 0.0) {
            return Err(ConfigError("once_every must be > 0".to_string()));
        }
        if self.body_frame.is_empty() {
            return Err(ConfigError("body_frame must not be empty".to_string()));
        }
        if !(self.remove_blocks_beyond_distance > 0.0) {
            return Err(ConfigError(
                "remove_blocks_beyond_distance must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Periodically erases all blocks whose bounds lie entirely beyond a
/// given distance from the body origin.
pub struct CropOperation {
    config: CropConfig,
    world_frame: String,
    last_run_stamp_nsec: Option<u64>,
}

impl CropOperation {
    pub fn new(config: CropConfig, world_frame: String) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(CropOperation {
            config,
            world_frame,
            last_run_stamp_nsec: None,
        })
    }

    pub fn should_run(&self, now_nsec: u64) -> bool {
        self.last_run_stamp_nsec.is_none_or(|last| {
            self.config.once_every < now_nsec.saturating_sub(last) as FloatingPoint * 1e-9
        })
    }

    pub fn run(
        &mut self,
        map: &mut Map,
        transform_buffer: &dyn TransformBuffer,
        now_nsec: u64,
        force_run: bool,
    ) {
        if !force_run && !self.should_run(now_nsec) {
            return;
        }
        self.last_run_stamp_nsec = Some(now_nsec);

        if map.empty() {
            return;
        }

        let Some(t_w_body) = transform_buffer.lookup_transform(
            &self.world_frame,
            &self.config.body_frame,
            now_nsec,
        ) else {
            warn!(
                "Could not look up center point for map cropping: transform of body frame \"{}\" \
                 w.r.t. world frame \"{}\" is unavailable at time {now_nsec}",
                self.config.body_frame, self.world_frame
            );
            return;
        };

        let body_origin = Point3D::from(t_w_body.translation.vector);
        crop_map(map, &body_origin, self.config.remove_blocks_beyond_distance);
    }
}

/// Erases every block whose AABB's minimum distance to `body_origin`
/// exceeds `remove_blocks_beyond_distance`.
pub fn crop_map(
    map: &mut Map,
    body_origin: &Point3D,
    remove_blocks_beyond_distance: FloatingPoint,
) {
    let block_height = map.block_height();
    let min_cell_width = map.min_cell_width();
    map.erase_blocks_if(|block_index| {
        let block_aabb =
            convert::node_index_to_aabb(OctreeIndex::new(block_height, block_index), min_cell_width);
        remove_blocks_beyond_distance < block_aabb.min_distance_to(body_origin)
    });
}

#[cfg(test)]
mod tests {
    use super::crop_map;
    use crate::geometry::grid::GridIndex;
    use crate::geometry::octree_index::OctreeIndex;
    use crate::geometry::point::Point3D;
    use crate::map::hashed_wavelet_octree::{HashedWaveletOctree, MapConfig};
    use crate::map::variant::Map;

    #[test]
    fn crop_keeps_only_nearby_blocks() {
        // Blocks of 8 cells at 0.125 m are 1 m wide.
        let mut map: Map = HashedWaveletOctree::new(MapConfig {
            min_cell_width: 0.125,
            tree_height: 3,
            ..MapConfig::default()
        })
        .into();

        // One cell in block (0,0,0) and one in block (100,0,0).
        map.set_cell_value(OctreeIndex::new(0, GridIndex::new(0, 0, 0)), 1.0);
        map.set_cell_value(OctreeIndex::new(0, GridIndex::new(800, 0, 0)), 1.0);
        assert_eq!(map.len(), 2);

        crop_map(&mut map, &Point3D::new(0.0, 0.0, 0.0), 10.0);

        assert_eq!(map.len(), 1);
        assert!((map.get_cell_value(GridIndex::new(0, 0, 0)) - 1.0).abs() < 1e-5);
        assert_eq!(map.get_cell_value(GridIndex::new(800, 0, 0)), 0.0);
    }
}
