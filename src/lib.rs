//! Dense direct RGB-D visual odometry.
//!
//! Given a reference grayscale + depth keyframe and a live grayscale image,
//! the tracker estimates the rigid motion between the two cameras by
//! minimizing the photometric error over every valid depth pixel,
//! coarse-to-fine over image pyramids.
//!
//! The entry points live in `core::track`: build a `Config`, turn it into
//! a `Tracker` with the camera rig, feed keyframes with `set_keyframe` and
//! track live frames with `estimate`.

pub mod core;
pub mod math;
pub mod misc;
