use crate::geometry::point::{FloatingPoint, PixelIndex, Point3D, Transformation3D};

/// Dense 2d grid of per-pixel values, stored row major.
#[derive(Clone, Debug)]
pub struct Image2D<T> {
    rows: usize,
    cols: usize,
    initial_value: T,
    data: Vec<T>,
}

impl<T: Clone> Image2D<T> {
    pub fn new(rows: usize, cols: usize, initial_value: T) -> Self {
        Image2D {
            rows,
            cols,
            data: vec![initial_value.clone(); rows * cols],
            initial_value,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn dimensions(&self) -> PixelIndex {
        PixelIndex::new(self.rows as i32, self.cols as i32)
    }

    pub fn initial_value(&self) -> &T {
        &self.initial_value
    }

    pub fn reset_to_initial(&mut self) {
        self.data.fill(self.initial_value.clone());
    }

    #[inline]
    pub fn in_bounds(&self, index: PixelIndex) -> bool {
        0 <= index.x
            && (index.x as usize) < self.rows
            && 0 <= index.y
            && (index.y as usize) < self.cols
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> &T {
        &self.data[row * self.cols + col]
    }

    #[inline]
    pub fn at_mut(&mut self, row: usize, col: usize) -> &mut T {
        &mut self.data[row * self.cols + col]
    }

    pub fn get(&self, index: PixelIndex) -> Option<&T> {
        self.in_bounds(index)
            .then(|| self.at(index.x as usize, index.y as usize))
    }

    pub fn get_mut(&mut self, index: PixelIndex) -> Option<&mut T> {
        if self.in_bounds(index) {
            Some(self.at_mut(index.x as usize, index.y as usize))
        } else {
            None
        }
    }
}

/// A range image: one measured distance per sensor pixel.
/// Pixels without a return hold 0, which is treated as unknown.
pub type RangeImage = Image2D<FloatingPoint>;

/// A range image tagged with the sensor pose it was captured from.
#[derive(Clone, Debug)]
pub struct PosedRangeImage {
    image: RangeImage,
    pose: Transformation3D,
    pose_inverse: Transformation3D,
}

/// Input type for pre-projected measurements: a posed range image.
pub type PosedImage = PosedRangeImage;

impl PosedRangeImage {
    pub fn new(rows: usize, cols: usize) -> Self {
        PosedRangeImage {
            image: RangeImage::new(rows, cols, 0.0),
            pose: Transformation3D::identity(),
            pose_inverse: Transformation3D::identity(),
        }
    }

    pub fn from_image(image: RangeImage, pose: Transformation3D) -> Self {
        PosedRangeImage {
            image,
            pose,
            pose_inverse: pose.inverse(),
        }
    }

    /// Clears all pixels and re-stamps the image with a new capture pose.
    pub fn reset(&mut self, pose: Transformation3D) {
        self.image.reset_to_initial();
        self.set_pose(pose);
    }

    pub fn set_pose(&mut self, pose: Transformation3D) {
        self.pose = pose;
        self.pose_inverse = pose.inverse();
    }

    /// Replaces the pixel contents with those of another image.
    pub fn copy_from(&mut self, other: &PosedRangeImage) {
        self.image = other.image.clone();
        self.set_pose(other.pose);
    }

    pub fn image(&self) -> &RangeImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RangeImage {
        &mut self.image
    }

    pub fn pose(&self) -> &Transformation3D {
        &self.pose
    }

    pub fn pose_inverse(&self) -> &Transformation3D {
        &self.pose_inverse
    }

    /// The sensor origin in world coordinates.
    pub fn origin(&self) -> Point3D {
        Point3D::from(self.pose.translation.vector)
    }
}
