use crate::geometry::grid::{Grid, GridIndex};
use crate::geometry::octree_index::{convert, OctreeIndex, NUM_CHILDREN};
use crate::geometry::point::{
    FloatingPoint, IndexElement, Point3D, Transformation3D, Vector2D, Vector3D,
    NOISE_THRESHOLD, UNIT_CUBE_HALF_DIAGONAL,
};
use crate::integrator::intersector::{RangeImageIntersector, UpdateType};
use crate::integrator::measurement::{MeasurementModel, MeasurementModelConfig};
use crate::integrator::projection::Projector;
use crate::integrator::range_image::{Image2D, PosedImage, PosedRangeImage};
use crate::map::block::WaveletBlock;
use crate::map::chunked::{
    node_offset_to_child_offset, node_offset_to_level_index, Chunk, ChunkedWaveletBlock,
    HashedChunkedWaveletOctree, MAX_NODE_OFFSET, ROOT_OFFSET,
};
use crate::map::hashed_wavelet_octree::HashedWaveletOctree;
use crate::map::node::Node;
use crate::map::variant::Map;
use crate::map::wavelet::{self, DetailCoefficients};
use crate::pointcloud::{is_pose_valid, PosedPointcloud};
use crate::utils::thread_pool::ThreadPool;
use crate::utils::ConfigError;
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProjectiveIntegratorConfig {
    pub min_range: FloatingPoint,
    pub max_range: FloatingPoint,
    /// Height below which per-leaf updates are computed in batch.
    pub termination_height: IndexElement,
    /// Nodes whose worst-case approximation error stays below this bound
    /// receive a single update at their center instead of refining.
    pub termination_update_error: FloatingPoint,
}

impl Default for ProjectiveIntegratorConfig {
    fn default() -> Self {
        ProjectiveIntegratorConfig {
            min_range: 0.5,
            max_range: 20.0,
            termination_height: 0,
            termination_update_error: 0.1,
        }
    }
}

impl ProjectiveIntegratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_range > 0.0) {
            return Err(ConfigError("min_range must be > 0".to_string()));
        }
        if self.min_range >= self.max_range {
            return Err(ConfigError(
                "min_range must be smaller than max_range".to_string(),
            ));
        }
        if self.termination_height < 0 {
            return Err(ConfigError("termination_height must be >= 0".to_string()));
        }
        if !(self.termination_update_error > 0.0) {
            return Err(ConfigError(
                "termination_update_error must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared per-integration constants, passed down the update recursion.
struct UpdateContext {
    pose_inverse: Transformation3D,
    sensor_origin: Point3D,
    min_cell_width: FloatingPoint,
    tree_height: IndexElement,
    min_log_odds_shrunk: FloatingPoint,
}

enum ChildAction {
    Skip,
    /// Apply a single update sampled at the child's center (given in
    /// sensor coordinates).
    Sample(Point3D),
    Refine,
}

/// Integrates posed pointclouds and range images into a map, refining
/// octree nodes only where the worst-case approximation error of a
/// coarse update would exceed the configured tolerance.
pub struct ProjectiveIntegrator {
    config: ProjectiveIntegratorConfig,
    projector: Box<dyn Projector>,
    measurement_model: MeasurementModel,
    posed_range_image: PosedRangeImage,
    beam_offset_image: Image2D<Vector2D>,
    thread_pool: Arc<ThreadPool>,
}

impl ProjectiveIntegrator {
    pub fn new(
        config: ProjectiveIntegratorConfig,
        projector: Box<dyn Projector>,
        measurement_model_config: MeasurementModelConfig,
        thread_pool: Arc<ThreadPool>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let measurement_model = MeasurementModel::new(measurement_model_config)?;
        let dimensions = projector.dimensions();
        let (rows, cols) = (dimensions.x as usize, dimensions.y as usize);
        Ok(ProjectiveIntegrator {
            config,
            projector,
            measurement_model,
            posed_range_image: PosedRangeImage::new(rows, cols),
            beam_offset_image: Image2D::new(rows, cols, Vector2D::zeros()),
            thread_pool,
        })
    }

    pub fn config(&self) -> &ProjectiveIntegratorConfig {
        &self.config
    }

    /// The range image produced by the last `integrate_pointcloud` call.
    pub fn posed_range_image(&self) -> &PosedRangeImage {
        &self.posed_range_image
    }

    pub fn integrate_pointcloud(&mut self, pointcloud: &PosedPointcloud, map: &mut Map) {
        if !is_pose_valid(pointcloud.pose()) {
            warn!("Ignoring pointcloud with an invalid pose.");
            return;
        }
        self.import_pointcloud(pointcloud);
        self.update_map(map);
    }

    pub fn integrate_range_image(&mut self, range_image: &PosedImage, map: &mut Map) {
        if range_image.image().dimensions() != self.projector.dimensions() {
            warn!(
                "Dimensions of range image {:?} do not match projection model {:?}. \
                 Ignoring integration request.",
                range_image.image().dimensions(),
                self.projector.dimensions()
            );
            return;
        }
        if !is_pose_valid(range_image.pose()) {
            warn!("Ignoring range image with an invalid pose.");
            return;
        }
        self.posed_range_image.copy_from(range_image);
        self.beam_offset_image.reset_to_initial();
        self.update_map(map);
    }

    fn is_measurement_valid(&self, c_point: &Point3D) -> bool {
        if !c_point.coords.iter().all(|v| v.is_finite()) {
            return false;
        }
        let range = c_point.coords.norm();
        self.config.min_range <= range && range <= self.config.max_range
    }

    /// Projects the pointcloud into the range image. When several points
    /// land on the same pixel, the closest return wins.
    fn import_pointcloud(&mut self, pointcloud: &PosedPointcloud) {
        self.posed_range_image.reset(*pointcloud.pose());
        self.beam_offset_image.reset_to_initial();

        for c_point in pointcloud.points_local() {
            if !self.is_measurement_valid(c_point) {
                continue;
            }
            let coordinates = self.projector.cartesian_to_sensor(c_point);
            let (pixel, beam_to_pixel_offset) = self
                .projector
                .image_to_nearest_index_and_offset(&coordinates.image);
            let Some(&old_range) = self.posed_range_image.image().get(pixel) else {
                continue;
            };
            if old_range < self.config.min_range || coordinates.depth < old_range {
                if let Some(range) = self.posed_range_image.image_mut().get_mut(pixel) {
                    *range = coordinates.depth;
                }
                if let Some(offset) = self.beam_offset_image.get_mut(pixel) {
                    *offset = beam_to_pixel_offset;
                }
            }
        }
    }

    fn update_map(&mut self, map: &mut Map) {
        if self.projector.azimuth_wraps_around_pi() {
            self.update_map_impl::<true>(map);
        } else {
            self.update_map_impl::<false>(map);
        }
    }

    fn update_map_impl<const AZIMUTH_WRAPS: bool>(&self, map: &mut Map) {
        match map {
            Map::HashedWaveletOctree(map) => self.update_wavelet_map::<AZIMUTH_WRAPS>(map),
            Map::HashedChunkedWaveletOctree(map) => {
                self.update_chunked_map::<AZIMUTH_WRAPS>(map)
            }
            Map::HashedBlocks(_) => {
                warn!("Projective integration is not supported for dense block maps.");
            }
        }
    }

    /// The block-aligned index range covering the sensor's field of view,
    /// padded by one block on each side.
    fn fov_min_max_indices(
        &self,
        sensor_origin: &Point3D,
        min_cell_width: FloatingPoint,
        tree_height: IndexElement,
    ) -> (OctreeIndex, OctreeIndex) {
        let height = 1 + ((self.config.max_range / min_cell_width).log2().ceil()
            as IndexElement)
            .max(tree_height);
        let min_cell_width_inv = 1.0 / min_cell_width;
        let block_size = 1 << tree_height;
        let fov_min_idx = convert::leaf_index_to_node_index(
            convert::point_to_floor_index(
                &(sensor_origin - Vector3D::repeat(self.config.max_range)),
                min_cell_width_inv,
            )
            .offset_by(GridIndex::splat(-block_size)),
            height,
        );
        let fov_max_idx = convert::leaf_index_to_node_index(
            convert::point_to_ceil_index(
                &(sensor_origin + Vector3D::repeat(self.config.max_range)),
                min_cell_width_inv,
            )
            .offset_by(GridIndex::splat(block_size)),
            height,
        );
        (fov_min_idx, fov_max_idx)
    }

    /// Descends from FOV-sized nodes down to block roots, collecting the
    /// indices of all blocks that need updating.
    #[allow(clippy::too_many_arguments)]
    fn recursive_tester<const AZIMUTH_WRAPS: bool>(
        &self,
        intersector: &RangeImageIntersector<'_, AZIMUTH_WRAPS>,
        node_index: OctreeIndex,
        context: &UpdateContext,
        min_log_odds: FloatingPoint,
        block_root_scale: &impl Fn(GridIndex) -> Option<FloatingPoint>,
        update_job_list: &mut Vec<GridIndex>,
    ) {
        let node_aabb = convert::node_index_to_aabb(node_index, context.min_cell_width);
        let update_type = intersector.determine_update_type(
            &node_aabb,
            &context.pose_inverse,
            &context.sensor_origin,
        );
        if update_type == UpdateType::FullyUnobserved {
            return;
        }

        if node_index.height == context.tree_height {
            if update_type == UpdateType::PossiblyOccupied {
                update_job_list.push(node_index.position);
            } else if let Some(root_scale) = block_root_scale(node_index.position) {
                // Blocks that are not yet saturated free still profit from
                // free-space updates.
                if min_log_odds + NOISE_THRESHOLD / 10.0 <= root_scale {
                    update_job_list.push(node_index.position);
                }
            }
            return;
        }

        for child_index in node_index.children() {
            self.recursive_tester(
                intersector,
                child_index,
                context,
                min_log_odds,
                block_root_scale,
                update_job_list,
            );
        }
    }

    fn select_blocks_to_update<const AZIMUTH_WRAPS: bool>(
        &self,
        intersector: &RangeImageIntersector<'_, AZIMUTH_WRAPS>,
        context: &UpdateContext,
        min_log_odds: FloatingPoint,
        block_root_scale: impl Fn(GridIndex) -> Option<FloatingPoint>,
    ) -> Vec<GridIndex> {
        let (fov_min_idx, fov_max_idx) = self.fov_min_max_indices(
            &context.sensor_origin,
            context.min_cell_width,
            context.tree_height,
        );
        let mut blocks_to_update = Vec::new();
        for block_index in Grid::new(fov_min_idx.position, fov_max_idx.position) {
            self.recursive_tester(
                intersector,
                OctreeIndex::new(fov_min_idx.height, block_index),
                context,
                min_log_odds,
                &block_root_scale,
                &mut blocks_to_update,
            );
        }
        blocks_to_update
    }

    fn update_context(&self, min_cell_width: FloatingPoint, tree_height: IndexElement, min_log_odds: FloatingPoint) -> UpdateContext {
        UpdateContext {
            pose_inverse: *self.posed_range_image.pose_inverse(),
            sensor_origin: self.posed_range_image.origin(),
            min_cell_width,
            tree_height,
            min_log_odds_shrunk: min_log_odds + NOISE_THRESHOLD,
        }
    }

    fn update_wavelet_map<const AZIMUTH_WRAPS: bool>(&self, map: &mut HashedWaveletOctree) {
        let intersector = RangeImageIntersector::<AZIMUTH_WRAPS>::new(
            &self.posed_range_image,
            self.projector.as_ref(),
            self.config.min_range,
            self.config.max_range,
        );
        let context = self.update_context(
            map.min_cell_width(),
            map.tree_height(),
            map.config().min_log_odds,
        );

        let blocks_to_update = self.select_blocks_to_update(
            &intersector,
            &context,
            map.config().min_log_odds,
            |block_index| map.get_block(block_index).map(|block| block.root_scale()),
        );
        debug!("Updating {} blocks.", blocks_to_update.len());

        // Allocate sequentially, then hand out one task per block. Tasks
        // are disjoint, so no synchronization on the map is needed.
        for &block_index in &blocks_to_update {
            map.get_or_allocate_block(block_index);
        }
        let update_set: HashSet<GridIndex> = blocks_to_update.into_iter().collect();
        let jobs: Vec<(GridIndex, &mut WaveletBlock)> = map
            .blocks_mut()
            .filter(|(block_index, _)| update_set.contains(block_index))
            .collect();
        self.thread_pool.run(jobs, |_, (block_index, block)| {
            self.update_block(&intersector, block, block_index, &context);
        });
    }

    fn update_chunked_map<const AZIMUTH_WRAPS: bool>(
        &self,
        map: &mut HashedChunkedWaveletOctree,
    ) {
        let intersector = RangeImageIntersector::<AZIMUTH_WRAPS>::new(
            &self.posed_range_image,
            self.projector.as_ref(),
            self.config.min_range,
            self.config.max_range,
        );
        let context = self.update_context(
            map.min_cell_width(),
            map.tree_height(),
            map.config().min_log_odds,
        );

        let blocks_to_update = self.select_blocks_to_update(
            &intersector,
            &context,
            map.config().min_log_odds,
            |block_index| map.get_block(block_index).map(|block| block.root_scale()),
        );
        debug!("Updating {} blocks.", blocks_to_update.len());

        for &block_index in &blocks_to_update {
            map.get_or_allocate_block(block_index);
        }
        let update_set: HashSet<GridIndex> = blocks_to_update.into_iter().collect();
        let jobs: Vec<(GridIndex, &mut ChunkedWaveletBlock)> = map
            .blocks_mut()
            .filter(|(block_index, _)| update_set.contains(block_index))
            .collect();
        self.thread_pool.run(jobs, |_, (block_index, block)| {
            self.update_chunked_block(&intersector, block, block_index, &context);
        });
    }

    fn update_block<const AZIMUTH_WRAPS: bool>(
        &self,
        intersector: &RangeImageIntersector<'_, AZIMUTH_WRAPS>,
        block: &mut WaveletBlock,
        block_index: GridIndex,
        context: &UpdateContext,
    ) {
        block.set_needs_pruning();
        let mut block_needs_thresholding = block.needs_thresholding();
        let root_index = OctreeIndex::new(context.tree_height, block_index);
        let (root_scale, root_node) = block.root_mut();
        self.update_node_recursive(
            intersector,
            root_node,
            root_index,
            root_scale,
            &mut block_needs_thresholding,
            context,
        );
        block.set_needs_thresholding(block_needs_thresholding);
    }

    fn update_chunked_block<const AZIMUTH_WRAPS: bool>(
        &self,
        intersector: &RangeImageIntersector<'_, AZIMUTH_WRAPS>,
        block: &mut ChunkedWaveletBlock,
        block_index: GridIndex,
        context: &UpdateContext,
    ) {
        block.set_needs_pruning();
        let mut block_needs_thresholding = block.needs_thresholding();
        let root_index = OctreeIndex::new(context.tree_height, block_index);
        let (root_scale, root_chunk) = block.root_mut();
        self.update_chunked_node_recursive(
            intersector,
            root_chunk,
            ROOT_OFFSET,
            root_index,
            root_scale,
            &mut block_needs_thresholding,
            context,
        );
        block.set_needs_thresholding(block_needs_thresholding);
    }

    /// Decides how a child node has to be handled for this measurement.
    fn classify_child<const AZIMUTH_WRAPS: bool>(
        &self,
        intersector: &RangeImageIntersector<'_, AZIMUTH_WRAPS>,
        child_index: OctreeIndex,
        child_value: FloatingPoint,
        context: &UpdateContext,
    ) -> ChildAction {
        let child_aabb = convert::node_index_to_aabb(child_index, context.min_cell_width);
        let update_type = intersector.determine_update_type(
            &child_aabb,
            &context.pose_inverse,
            &context.sensor_origin,
        );

        // Fully unobserved nodes and nodes that would only receive free
        // space updates while already being saturated free can be skipped.
        if update_type == UpdateType::FullyUnobserved {
            return ChildAction::Skip;
        }
        if update_type != UpdateType::PossiblyOccupied
            && child_value < context.min_log_odds_shrunk
        {
            return ChildAction::Skip;
        }

        let child_width = child_aabb.width();
        let c_child_center = context.pose_inverse * child_aabb.center();
        let d_c_child = self.projector.cartesian_to_sensor_z(&c_child_center);
        let bounding_sphere_radius = UNIT_CUBE_HALF_DIAGONAL * child_width;
        if self.measurement_model.compute_worst_case_approximation_error(
            update_type,
            d_c_child,
            bounding_sphere_radius,
        ) < self.config.termination_update_error
        {
            ChildAction::Sample(c_child_center)
        } else {
            ChildAction::Refine
        }
    }

    fn update_node_recursive<const AZIMUTH_WRAPS: bool>(
        &self,
        intersector: &RangeImageIntersector<'_, AZIMUTH_WRAPS>,
        node: &mut Node<DetailCoefficients>,
        node_index: OctreeIndex,
        node_value: &mut FloatingPoint,
        block_needs_thresholding: &mut bool,
        context: &UpdateContext,
    ) {
        // Decompress the child scales, update them, and recompress.
        let mut child_scales = wavelet::backward(*node_value, node.data());
        for rel in 0..NUM_CHILDREN as u8 {
            let child_index = node_index.child(rel);
            let child_value = child_scales[rel as usize];
            match self.classify_child(intersector, child_index, child_value, context) {
                ChildAction::Skip => continue,
                ChildAction::Sample(c_child_center) => {
                    child_scales[rel as usize] += self.measurement_model.compute_update(
                        self.projector.as_ref(),
                        self.posed_range_image.image(),
                        &c_child_center,
                    );
                    *block_needs_thresholding = true;
                }
                ChildAction::Refine => {
                    let child_node = node.get_or_allocate_child(rel);
                    if child_index.height <= self.config.termination_height + 1 {
                        let mut child_value = child_scales[rel as usize];
                        self.update_leaves_batch(
                            child_node.data_mut(),
                            &mut child_value,
                            child_index,
                            context,
                        );
                        child_scales[rel as usize] = child_value;
                        *block_needs_thresholding = true;
                    } else {
                        self.update_node_recursive(
                            intersector,
                            child_node,
                            child_index,
                            &mut child_scales[rel as usize],
                            block_needs_thresholding,
                            context,
                        );
                    }
                }
            }
        }
        let (new_scale, new_details) = wavelet::forward(child_scales);
        *node.data_mut() = new_details;
        *node_value = new_scale;
    }

    #[allow(clippy::too_many_arguments)]
    fn update_chunked_node_recursive<const AZIMUTH_WRAPS: bool>(
        &self,
        intersector: &RangeImageIntersector<'_, AZIMUTH_WRAPS>,
        chunk: &mut Chunk,
        offset: usize,
        node_index: OctreeIndex,
        node_value: &mut FloatingPoint,
        block_needs_thresholding: &mut bool,
        context: &UpdateContext,
    ) {
        let mut child_scales = wavelet::backward(*node_value, chunk.node_details(offset));
        for rel in 0..NUM_CHILDREN as u8 {
            let child_index = node_index.child(rel);
            let child_value = child_scales[rel as usize];
            match self.classify_child(intersector, child_index, child_value, context) {
                ChildAction::Skip => continue,
                ChildAction::Sample(c_child_center) => {
                    child_scales[rel as usize] += self.measurement_model.compute_update(
                        self.projector.as_ref(),
                        self.posed_range_image.image(),
                        &c_child_center,
                    );
                    *block_needs_thresholding = true;
                }
                ChildAction::Refine => {
                    chunk.node_set_has_child(offset, rel);
                    let child_offset = node_offset_to_child_offset::<3>(offset, rel);
                    let mut child_value = child_scales[rel as usize];
                    let batch_leaves =
                        child_index.height <= self.config.termination_height + 1;
                    if child_offset <= MAX_NODE_OFFSET {
                        if batch_leaves {
                            self.update_leaves_batch(
                                chunk.node_details_mut(child_offset),
                                &mut child_value,
                                child_index,
                                context,
                            );
                            *block_needs_thresholding = true;
                        } else {
                            self.update_chunked_node_recursive(
                                intersector,
                                chunk,
                                child_offset,
                                child_index,
                                &mut child_value,
                                block_needs_thresholding,
                                context,
                            );
                        }
                    } else {
                        let level_index = node_offset_to_level_index::<3>(child_offset);
                        let child_chunk = chunk.get_or_allocate_child_chunk(level_index);
                        if batch_leaves {
                            self.update_leaves_batch(
                                child_chunk.node_details_mut(ROOT_OFFSET),
                                &mut child_value,
                                child_index,
                                context,
                            );
                            *block_needs_thresholding = true;
                        } else {
                            self.update_chunked_node_recursive(
                                intersector,
                                child_chunk,
                                ROOT_OFFSET,
                                child_index,
                                &mut child_value,
                                block_needs_thresholding,
                                context,
                            );
                        }
                    }
                    child_scales[rel as usize] = child_value;
                }
            }
        }
        let (new_scale, new_details) = wavelet::forward(child_scales);
        *chunk.node_details_mut(offset) = new_details;
        *node_value = new_scale;
    }

    /// Computes per-leaf updates for all children of a deepest-level
    /// node in one tight loop, without further classification.
    fn update_leaves_batch(
        &self,
        details: &mut DetailCoefficients,
        node_value: &mut FloatingPoint,
        node_index: OctreeIndex,
        context: &UpdateContext,
    ) {
        let mut leaf_scales = wavelet::backward(*node_value, details);
        for rel in 0..NUM_CHILDREN as u8 {
            let leaf_index = node_index.child(rel);
            let w_center = convert::node_index_to_center_point(leaf_index, context.min_cell_width);
            let c_center = context.pose_inverse * w_center;
            leaf_scales[rel as usize] += self.measurement_model.compute_update(
                self.projector.as_ref(),
                self.posed_range_image.image(),
                &c_center,
            );
        }
        let (new_scale, new_details) = wavelet::forward(leaf_scales);
        *details = new_details;
        *node_value = new_scale;
    }
}
