mod bbox;
pub use self::bbox::BBox;

mod math;
pub use self::math::*;

mod matrix;
pub use self::matrix::Mat;

mod vector;
pub use self::vector::{Vec, Vec2};

mod xform;
pub use self::xform::Xform;
