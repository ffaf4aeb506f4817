pub mod hierarchical;
pub mod intersector;
pub mod measurement;
pub mod projection;
pub mod projective;
pub mod range_image;
