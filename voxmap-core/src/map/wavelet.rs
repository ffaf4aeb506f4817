use crate::geometry::point::FloatingPoint;
use crate::geometry::octree_index::NUM_CHILDREN;

/// The detail coefficients stored at each internal octree node.
pub type DetailCoefficients = [FloatingPoint; NUM_CHILDREN - 1];

/// The reconstructed scale values of a node's 8 children.
pub type ChildScales = [FloatingPoint; NUM_CHILDREN];

/// Compresses the scale values of 8 sibling octants into their parent
/// scale and 7 detail coefficients.
///
/// The transform runs a Haar-like pairwise average/difference pass along
/// each axis in turn, so the returned scale is the mean of the children
/// and `backward(forward(x)) == x` up to floating point rounding.
pub fn forward(child_scales: ChildScales) -> (FloatingPoint, DetailCoefficients) {
    let mut c = child_scales;
    for stride in [1usize, 2, 4] {
        for i in 0..NUM_CHILDREN {
            if i & stride == 0 {
                let a = c[i];
                let b = c[i + stride];
                c[i] = 0.5 * (a + b);
                c[i + stride] = 0.5 * (b - a);
            }
        }
    }
    (c[0], [c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
}

/// Reconstructs the scale values of a node's 8 children from its parent
/// scale and detail coefficients. Exact inverse of [forward].
pub fn backward(scale: FloatingPoint, details: &DetailCoefficients) -> ChildScales {
    let mut c = [
        scale, details[0], details[1], details[2], details[3], details[4], details[5], details[6],
    ];
    for stride in [4usize, 2, 1] {
        for i in 0..NUM_CHILDREN {
            if i & stride == 0 {
                let s = c[i];
                let d = c[i + stride];
                c[i] = s - d;
                c[i + stride] = s + d;
            }
        }
    }
    c
}

#[cfg(test)]
mod tests {
    use super::{backward, forward};
    use rand::Rng;

    #[test]
    fn uniform_children_have_zero_details() {
        let (scale, details) = forward([0.75; 8]);
        assert_eq!(scale, 0.75);
        assert_eq!(details, [0.0; 7]);
    }

    #[test]
    fn scale_is_the_child_average() {
        let children = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let (scale, _) = forward(children);
        assert!((scale - 4.5).abs() < 1e-6);
    }

    #[test]
    fn transform_is_a_bijection() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let children: [f32; 8] = std::array::from_fn(|_| rng.gen_range(-10.0..10.0));
            let (scale, details) = forward(children);
            let reconstructed = backward(scale, &details);
            let norm: f32 = children.iter().map(|v| v * v).sum::<f32>().sqrt();
            for (orig, rec) in children.iter().zip(reconstructed.iter()) {
                assert!(
                    (orig - rec).abs() <= 1e-6 * norm.max(1.0),
                    "reconstruction mismatch: {orig} vs {rec}"
                );
            }
        }
    }

    #[test]
    fn backward_of_single_detail() {
        // A detail coefficient in slot 0 encodes the x axis difference.
        let children = backward(1.0, &[0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(children, [0.5, 1.5, 0.5, 1.5, 0.5, 1.5, 0.5, 1.5]);
    }
}
