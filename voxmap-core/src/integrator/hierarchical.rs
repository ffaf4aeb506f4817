use crate::geometry::point::{FloatingPoint, IndexElement, PixelIndex};
use crate::integrator::range_image::RangeImage;

/// Range image values reported for pixels with no information.
pub const UNKNOWN_VALUE_LOWER_BOUND: FloatingPoint = FloatingPoint::MAX;
pub const UNKNOWN_VALUE_UPPER_BOUND: FloatingPoint = 0.0;

/// Range image values below this are treated as unknown when building
/// the lower bound pyramid. Spurious returns close to the sensor (missing
/// returns encoded as zeros, cages, the robot's own body) would otherwise
/// min-pool into huge conservative intervals.
pub const RANGE_MIN: FloatingPoint = 0.5;

/// A conservative interval of range values.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds {
    pub lower: FloatingPoint,
    pub upper: FloatingPoint,
}

impl Bounds {
    fn combine(self, other: Bounds) -> Bounds {
        Bounds {
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
        }
    }
}

/// Min and max reduced pyramids over a range image, answering
/// conservative interval queries over arbitrary pixel rectangles with a
/// handful of reads.
///
/// `AZIMUTH_WRAPS` makes the horizontal (column) axis cyclic.
pub struct HierarchicalRangeImage<'a, const AZIMUTH_WRAPS: bool> {
    base: &'a RangeImage,
    lower_bounds: Vec<RangeImage>,
    upper_bounds: Vec<RangeImage>,
}

impl<'a, const AZIMUTH_WRAPS: bool> HierarchicalRangeImage<'a, AZIMUTH_WRAPS> {
    pub fn new(base: &'a RangeImage) -> Self {
        let lower_bounds = compute_reduced_pyramid(
            base,
            FloatingPoint::min,
            UNKNOWN_VALUE_LOWER_BOUND,
            true,
        );
        let upper_bounds = compute_reduced_pyramid(
            base,
            FloatingPoint::max,
            UNKNOWN_VALUE_UPPER_BOUND,
            false,
        );
        HierarchicalRangeImage {
            base,
            lower_bounds,
            upper_bounds,
        }
    }

    /// Number of pyramid levels above the base image.
    pub fn max_height(&self) -> IndexElement {
        self.lower_bounds.len() as IndexElement
    }

    /// Bounds of the quadtree node at the given height and position.
    /// A node at height `h` covers a `2^h x 2^h` pixel area.
    pub fn get_bounds(&self, height: IndexElement, index: PixelIndex) -> Bounds {
        debug_assert!((0..=self.max_height()).contains(&height));
        if height == 0 {
            let Some(&value) = self.base.get(index) else {
                return Bounds {
                    lower: UNKNOWN_VALUE_LOWER_BOUND,
                    upper: UNKNOWN_VALUE_UPPER_BOUND,
                };
            };
            return Bounds {
                lower: value_or_init(value, UNKNOWN_VALUE_LOWER_BOUND),
                upper: value,
            };
        }
        let level = (height - 1) as usize;
        Bounds {
            lower: self.lower_bounds[level]
                .get(index)
                .copied()
                .unwrap_or(UNKNOWN_VALUE_LOWER_BOUND),
            upper: self.upper_bounds[level]
                .get(index)
                .copied()
                .unwrap_or(UNKNOWN_VALUE_UPPER_BOUND),
        }
    }

    /// Bounds over the inclusive pixel rectangle `[left_idx, right_idx]`.
    ///
    /// When `AZIMUTH_WRAPS` and `right_idx.y < left_idx.y`, the interval
    /// is interpreted as wrapping around the image border and the query
    /// is answered from the two non-wrapping halves.
    pub fn get_range_bounds(&self, left_idx: PixelIndex, right_idx: PixelIndex) -> Bounds {
        debug_assert!(left_idx.x <= right_idx.x);
        if !AZIMUTH_WRAPS || left_idx.y <= right_idx.y {
            return self.rectangle_bounds(left_idx, right_idx);
        }
        let last_col = self.base.cols() as IndexElement - 1;
        self.rectangle_bounds(left_idx, PixelIndex::new(right_idx.x, last_col))
            .combine(self.rectangle_bounds(
                PixelIndex::new(left_idx.x, 0),
                right_idx,
            ))
    }

    fn rectangle_bounds(&self, min_idx: PixelIndex, max_idx: PixelIndex) -> Bounds {
        debug_assert!(min_idx.x <= max_idx.x && min_idx.y <= max_idx.y);
        let extent = (max_idx.x - min_idx.x).max(max_idx.y - min_idx.y) as u32 + 1;
        let height =
            (extent.next_power_of_two().trailing_zeros() as IndexElement).min(self.max_height());

        let mut bounds = Bounds {
            lower: UNKNOWN_VALUE_LOWER_BOUND,
            upper: UNKNOWN_VALUE_UPPER_BOUND,
        };
        for row in (min_idx.x >> height)..=(max_idx.x >> height) {
            for col in (min_idx.y >> height)..=(max_idx.y >> height) {
                bounds = bounds.combine(self.get_bounds(height, PixelIndex::new(row, col)));
            }
        }
        bounds
    }
}

fn value_or_init(value: FloatingPoint, init: FloatingPoint) -> FloatingPoint {
    if value < RANGE_MIN {
        init
    } else {
        value
    }
}

fn compute_reduced_pyramid(
    base: &RangeImage,
    reduce: fn(FloatingPoint, FloatingPoint) -> FloatingPoint,
    init: FloatingPoint,
    filter_base: bool,
) -> Vec<RangeImage> {
    let mut levels: Vec<RangeImage> = Vec::new();
    let (mut rows, mut cols) = (base.rows(), base.cols());
    while rows > 1 || cols > 1 {
        let level = match levels.last() {
            None => reduce_once(rows, cols, reduce, init, |row, col| {
                let value = base.get(PixelIndex::new(row, col)).copied().unwrap_or(init);
                if filter_base {
                    value_or_init(value, init)
                } else {
                    value
                }
            }),
            Some(previous) => reduce_once(rows, cols, reduce, init, |row, col| {
                previous.get(PixelIndex::new(row, col)).copied().unwrap_or(init)
            }),
        };
        rows = level.rows();
        cols = level.cols();
        levels.push(level);
    }
    levels
}

fn reduce_once(
    source_rows: usize,
    source_cols: usize,
    reduce: fn(FloatingPoint, FloatingPoint) -> FloatingPoint,
    init: FloatingPoint,
    read: impl Fn(i32, i32) -> FloatingPoint,
) -> RangeImage {
    let rows = source_rows.div_ceil(2);
    let cols = source_cols.div_ceil(2);
    let mut level = RangeImage::new(rows, cols, init);
    for row in 0..rows {
        for col in 0..cols {
            let mut value = init;
            for (dr, dc) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                value = reduce(value, read(2 * row as i32 + dr, 2 * col as i32 + dc));
            }
            *level.at_mut(row, col) = value;
        }
    }
    level
}
