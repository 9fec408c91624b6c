//! Type aliases for common types used all over the code base.
//!
//! Solver math runs in double precision; image intensities and depths
//! are stored and sampled in single precision.

use nalgebra as na;

pub type Float = f64;

pub type Vec3 = na::Vector3<Float>;
pub type Vec4 = na::Vector4<Float>;
pub type Vec6 = na::Vector6<Float>;

pub type RowVec2 = na::RowVector2<Float>;

pub type Mat2x3 = na::Matrix2x3<Float>;
pub type Mat3 = na::Matrix3<Float>;
pub type Mat3x4 = na::Matrix3x4<Float>;
pub type Mat4 = na::Matrix4<Float>;
pub type Mat6 = na::Matrix6<Float>;

pub type Iso3 = na::Isometry3<Float>;

/// Image and depth grids: row index is the pixel row v, column index is u.
pub type Grid = na::DMatrix<f32>;
