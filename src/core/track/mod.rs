// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Coarse-to-fine dense photometric tracking.
//!
//! The driver owns the keyframe pyramids and the per-level camera
//! models, and refines a rigid motion estimate from the coarsest pyramid
//! level down to the finest. Each iteration linearizes the photometric
//! error over every valid depth pixel (see [`residual`]), reduces the
//! contributions in parallel (see [`reducer`]), solves the Gauss-Newton
//! normal equations and applies the twist update on SE(3).
//!
//! Iterating coarse-to-fine both enlarges the convergence basin and
//! keeps the refinement cheap: coarse levels get the larger iteration
//! budgets and only refine rotation by default at the coarsest one,
//! where translation is hardly observable.

pub mod norm;
pub mod reducer;
pub mod residual;

use crate::core::camera::Intrinsics;
use crate::core::multires;
use crate::core::track::norm::RobustNorm;
use crate::core::track::reducer::reduce;
use crate::core::track::residual::EvalContext;
use crate::math::{linear, se3};
use crate::misc::type_aliases::{Float, Grid, Iso3, Mat4, Mat6, Vec6};

/// Iteration budget of the finest level when the pyramid is disabled.
const NO_PYRAMID_ITERATIONS: usize = 3;

/// Twist norm under which a level is declared converged.
const CONVERGENCE_EPSILON: Float = 1e-5;

/// Minimum width and height kept at the coarsest pyramid level; the
/// bilinear sampler needs a 4-pixel neighborhood to clamp into.
const MIN_COARSEST_SIDE: usize = 4;

/// Validation errors of the tracker API boundary.
///
/// Nothing inside the minimization itself is fatal: degenerate systems,
/// divergence and empty reductions are logged and degrade gracefully.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TrackerError {
    #[error("a pyramid needs at least one level")]
    NoLevels,
    #[error("max_iterations has {found} entries for {levels} pyramid levels")]
    IterationScheduleLength { found: usize, levels: usize },
    #[error("rotation_only has {found} entries for {levels} pyramid levels")]
    RotationMaskLength { found: usize, levels: usize },
    #[error("keyframe grayscale is {grey_rows}x{grey_cols} but depth is {depth_rows}x{depth_cols}")]
    KeyframeShapeMismatch {
        grey_rows: usize,
        grey_cols: usize,
        depth_rows: usize,
        depth_cols: usize,
    },
    #[error("{rows}x{cols} images cannot hold {levels} pyramid levels")]
    NotEnoughResolution {
        rows: usize,
        cols: usize,
        levels: usize,
    },
    #[error("live image is {live_rows}x{live_cols} but the keyframe is {ref_rows}x{ref_cols}")]
    LiveShapeMismatch {
        live_rows: usize,
        live_cols: usize,
        ref_rows: usize,
        ref_cols: usize,
    },
    #[error("estimate called before any keyframe was set")]
    NoKeyframe,
}

/// Camera models of the RGB-D rig being tracked.
#[derive(Debug, Clone, Copy)]
pub struct Rig {
    /// Intrinsics of the live grayscale camera.
    pub live_grey: Intrinsics,
    /// Intrinsics of the reference grayscale camera.
    pub ref_grey: Intrinsics,
    /// Intrinsics of the reference depth camera.
    pub ref_depth: Intrinsics,
    /// Depth-to-grayscale extrinsic of the reference rig.
    pub depth_to_grey: Iso3,
}

impl Rig {
    /// Rig with a single camera model and depth aligned to grayscale,
    /// the common case for consumer RGB-D sensors.
    pub fn aligned(intrinsics: Intrinsics) -> Rig {
        Rig {
            live_grey: intrinsics,
            ref_grey: intrinsics,
            ref_depth: intrinsics,
            depth_to_grey: Iso3::identity(),
        }
    }
}

/// Configuration of the tracker, immutable for the duration of a call.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of levels in the multi-resolution pyramids of images.
    pub nb_levels: usize,
    /// Robust norm re-weighting the photometric residuals.
    pub norm: RobustNorm,
    /// Norm scale at the finest level; level `l` uses `norm_param * (l + 1)`.
    pub norm_param: Float,
    /// Skip residuals whose intensities are exactly 0 or 1.
    pub discard_saturated: bool,
    /// Depth validity range in meters, exclusive on both ends.
    pub min_depth: f32,
    pub max_depth: f32,
    /// Per-level iteration caps, indexed by level (0 = finest), so the
    /// default schedule gives coarser levels the larger budgets.
    pub max_iterations: Vec<usize>,
    /// Levels on which only the rotation is refined. True only at the
    /// coarsest level by default (and never for a single-level pyramid).
    pub rotation_only: Vec<bool>,
}

impl Config {
    /// Default configuration for a pyramid with the given level count.
    pub fn new(nb_levels: usize) -> Config {
        Config {
            nb_levels,
            norm: RobustNorm::default(),
            norm_param: 0.04,
            discard_saturated: true,
            min_depth: 0.01,
            max_depth: 100.0,
            max_iterations: (1..=nb_levels).collect(),
            rotation_only: (0..nb_levels)
                .map(|level| nb_levels > 1 && level + 1 == nb_levels)
                .collect(),
        }
    }

    /// Initialize a tracker for the given camera rig.
    ///
    /// Stores intrinsics scaled by `2^-level` for every pyramid level of
    /// each of the three cameras.
    pub fn init(self, rig: Rig) -> Result<Tracker, TrackerError> {
        if self.nb_levels == 0 {
            return Err(TrackerError::NoLevels);
        }
        if self.max_iterations.len() != self.nb_levels {
            return Err(TrackerError::IterationScheduleLength {
                found: self.max_iterations.len(),
                levels: self.nb_levels,
            });
        }
        if self.rotation_only.len() != self.nb_levels {
            return Err(TrackerError::RotationMaskLength {
                found: self.rotation_only.len(),
                levels: self.nb_levels,
            });
        }
        let nb_levels = self.nb_levels;
        Ok(Tracker {
            config: self,
            live_grey_multires: rig.live_grey.multi_res(nb_levels),
            ref_grey_multires: rig.ref_grey.multi_res(nb_levels),
            ref_depth_multires: rig.ref_depth.multi_res(nb_levels),
            tgd: rig.depth_to_grey.to_homogeneous(),
            keyframe: None,
        })
    }
}

/// Reference data the live frames are aligned against.
struct Keyframe {
    grey_multires: Vec<Grid>,
    depth_multires: Vec<Grid>,
}

/// Result of one motion estimation.
#[derive(Debug, Clone)]
pub struct Estimate {
    /// Refined reference-from-live motion.
    pub pose: Iso3,
    /// Inverse of the unweighted Hessian accumulated at the finest level
    /// on the last accepted iteration. `diag(+inf)` when that Hessian
    /// carries no information (degenerate or never reached).
    pub covariance: Mat6,
    /// Root mean square photometric residual of the last accepted
    /// iteration at the finest level, `+inf` if there was none.
    pub rms: Float,
}

/// Dense RGB-D tracker: owns the keyframe pyramids and per-level
/// camera models, estimates keyframe-to-live rigid motions.
pub struct Tracker {
    config: Config,
    live_grey_multires: Vec<Intrinsics>,
    ref_grey_multires: Vec<Intrinsics>,
    ref_depth_multires: Vec<Intrinsics>,
    tgd: Mat4,
    keyframe: Option<Keyframe>,
}

impl Tracker {
    /// Ingest a new reference pair and build its pyramids.
    ///
    /// Grayscale must be normalized to [0,1]; depth is metric with NaN
    /// marking missing cells (see `misc::interop` for conversions).
    pub fn set_keyframe(&mut self, ref_grey: Grid, ref_depth: Grid) -> Result<(), TrackerError> {
        let (grey_rows, grey_cols) = ref_grey.shape();
        let (depth_rows, depth_cols) = ref_depth.shape();
        if (grey_rows, grey_cols) != (depth_rows, depth_cols) {
            return Err(TrackerError::KeyframeShapeMismatch {
                grey_rows,
                grey_cols,
                depth_rows,
                depth_cols,
            });
        }
        self.check_resolution(grey_rows, grey_cols)?;
        self.keyframe = Some(Keyframe {
            grey_multires: multires::grey_pyramid(ref_grey, self.config.nb_levels),
            depth_multires: multires::depth_pyramid(ref_depth, self.config.nb_levels),
        });
        Ok(())
    }

    /// Refine the motion between the keyframe and a live image.
    ///
    /// `pose_hint` is the reference-from-live motion to start from
    /// (constant velocity prediction, or identity). With `use_pyramid`
    /// false only the finest level runs, on a fixed iteration budget.
    ///
    /// This always produces a motion and an error: degenerate inputs
    /// leave the hint untouched with an infinite rms rather than fail.
    pub fn estimate(
        &self,
        live_grey: &Grid,
        pose_hint: &Iso3,
        use_pyramid: bool,
    ) -> Result<Estimate, TrackerError> {
        let keyframe = self.keyframe.as_ref().ok_or(TrackerError::NoKeyframe)?;
        let (ref_rows, ref_cols) = keyframe.grey_multires[0].shape();
        let (live_rows, live_cols) = live_grey.shape();
        if (live_rows, live_cols) != (ref_rows, ref_cols) {
            return Err(TrackerError::LiveShapeMismatch {
                live_rows,
                live_cols,
                ref_rows,
                ref_cols,
            });
        }

        let live_grey_multires =
            multires::grey_pyramid(live_grey.clone(), self.config.nb_levels);

        let mut trl = *pose_hint;
        let mut hessian = Mat6::zeros();
        let mut last_error = Float::INFINITY;

        for level in (0..self.config.nb_levels).rev() {
            let live_img = &live_grey_multires[level];
            let ref_img = &keyframe.grey_multires[level];
            let depth_img = &keyframe.depth_multires[level];

            let norm_scale = self.config.norm_param * (level as Float + 1.0);
            let max_iterations = if use_pyramid {
                self.config.max_iterations[level]
            } else if level == 0 {
                NO_PYRAMID_ITERATIONS
            } else {
                0
            };

            last_error = Float::INFINITY;

            for iteration in 0..max_iterations {
                let tlr = trl.inverse();
                let tlr_mat = tlr.to_homogeneous();
                let klg_tlr = self.live_grey_multires[level].matrix()
                    * tlr_mat.fixed_view::<3, 4>(0, 0).into_owned();

                let context = EvalContext {
                    live_grey: live_img,
                    ref_grey: ref_img,
                    ref_depth: depth_img,
                    klg: self.live_grey_multires[level],
                    krg: self.ref_grey_multires[level],
                    krd: self.ref_depth_multires[level],
                    tgd: self.tgd,
                    tlr: tlr_mat,
                    klg_tlr,
                    norm: self.config.norm,
                    norm_scale,
                    discard_saturated: self.config.discard_saturated,
                    min_depth: self.config.min_depth,
                    max_depth: self.config.max_depth,
                };
                let acc = reduce(&context);

                if acc.nb_obs == 0 {
                    log::warn!(
                        "[@L:{} I:{}] no valid observations, keeping current estimate",
                        level,
                        iteration
                    );
                    break;
                }

                let x = if self.config.rotation_only[level] {
                    let rot_lhs = acc.lhs.fixed_view::<3, 3>(3, 3).into_owned();
                    let rot_rhs = -acc.rhs.fixed_rows::<3>(3).into_owned();
                    let (rot_x, rank) = linear::solve_full_piv(&rot_lhs, &rot_rhs);
                    if rank < 3 {
                        log::warn!(
                            "[@L:{} I:{}] rank deficient rotation system: rank {} of 3",
                            level,
                            iteration,
                            rank
                        );
                    }
                    let mut x = Vec6::zeros();
                    x.fixed_rows_mut::<3>(3).copy_from(&rot_x);
                    x
                } else {
                    let (x, rank) = linear::solve_full_piv(&acc.lhs, &-acc.rhs);
                    if rank < 6 {
                        log::warn!(
                            "[@L:{} I:{}] rank deficient system: rank {} of 6",
                            level,
                            iteration,
                            rank
                        );
                    }
                    x
                };

                let new_error = acc.rms();
                if new_error < last_error {
                    last_error = new_error;
                    trl = (tlr * se3::exp(x)).inverse();
                    log::debug!(
                        "[@L:{} I:{}] rms {:.2e}, step norm {:.2e}",
                        level,
                        iteration,
                        new_error,
                        x.norm()
                    );
                    // Covariance is taken at the finest level only.
                    if level == 0 {
                        hessian = acc.hessian;
                    }
                    if x.norm() < CONVERGENCE_EPSILON {
                        log::debug!("[@L:{} I:{}] update too small, breaking early", level, iteration);
                        break;
                    }
                } else {
                    log::debug!("[@L:{} I:{}] error is increasing, breaking early", level, iteration);
                    break;
                }
            }
        }

        let covariance = hessian
            .try_inverse()
            .unwrap_or_else(|| Mat6::from_diagonal_element(Float::INFINITY));
        Ok(Estimate {
            pose: trl,
            covariance,
            rms: last_error,
        })
    }

    /// Check that halving `nb_levels - 1` times keeps a usable image.
    fn check_resolution(&self, rows: usize, cols: usize) -> Result<(), TrackerError> {
        let (mut r, mut c) = (rows, cols);
        for _ in 1..self.config.nb_levels {
            r /= 2;
            c /= 2;
        }
        if r < MIN_COARSEST_SIDE || c < MIN_COARSEST_SIDE {
            return Err(TrackerError::NotEnoughResolution {
                rows,
                cols,
                levels: self.config.nb_levels,
            });
        }
        Ok(())
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use nalgebra::DMatrix;

    fn gen_rig() -> Rig {
        Rig::aligned(Intrinsics::new(100.0, 100.0, 32.0, 32.0))
    }

    #[test]
    fn default_schedule_favors_coarse_levels() {
        let config = Config::new(4);
        assert_eq!(config.max_iterations, vec![1, 2, 3, 4]);
        assert_eq!(config.rotation_only, vec![false, false, false, true]);
    }

    #[test]
    fn single_level_estimates_all_six_parameters() {
        let config = Config::new(1);
        assert_eq!(config.rotation_only, vec![false]);
    }

    #[test]
    fn init_checks_schedule_lengths() {
        let mut config = Config::new(3);
        config.max_iterations = vec![1, 2];
        match config.init(gen_rig()) {
            Err(TrackerError::IterationScheduleLength { found: 2, levels: 3 }) => {}
            other => panic!("unexpected: {:?}", other.err()),
        }

        let mut config = Config::new(3);
        config.rotation_only = vec![false];
        assert!(matches!(
            config.init(gen_rig()),
            Err(TrackerError::RotationMaskLength { found: 1, levels: 3 })
        ));

        assert!(matches!(
            Config::new(0).init(gen_rig()),
            Err(TrackerError::NoLevels)
        ));
    }

    #[test]
    fn set_keyframe_checks_shapes() {
        let mut tracker = Config::new(2).init(gen_rig()).unwrap();
        let grey = DMatrix::from_element(64, 64, 0.5_f32);
        let depth = DMatrix::from_element(64, 32, 1.0_f32);
        assert!(matches!(
            tracker.set_keyframe(grey, depth),
            Err(TrackerError::KeyframeShapeMismatch { .. })
        ));
    }

    #[test]
    fn set_keyframe_checks_resolution() {
        let mut tracker = Config::new(5).init(gen_rig()).unwrap();
        let grey = DMatrix::from_element(32, 32, 0.5_f32);
        let depth = DMatrix::from_element(32, 32, 1.0_f32);
        // 32 pixels halved four times leaves a 2-pixel image.
        assert!(matches!(
            tracker.set_keyframe(grey, depth),
            Err(TrackerError::NotEnoughResolution { .. })
        ));
    }

    #[test]
    fn estimate_needs_a_keyframe() {
        let tracker = Config::new(2).init(gen_rig()).unwrap();
        let live = DMatrix::from_element(64, 64, 0.5_f32);
        assert!(matches!(
            tracker.estimate(&live, &Iso3::identity(), true),
            Err(TrackerError::NoKeyframe)
        ));
    }

    #[test]
    fn estimate_checks_live_shape() {
        let mut tracker = Config::new(2).init(gen_rig()).unwrap();
        let grey = DMatrix::from_element(64, 64, 0.5_f32);
        let depth = DMatrix::from_element(64, 64, 1.0_f32);
        tracker.set_keyframe(grey, depth).unwrap();
        let live = DMatrix::from_element(32, 64, 0.5_f32);
        assert!(matches!(
            tracker.estimate(&live, &Iso3::identity(), true),
            Err(TrackerError::LiveShapeMismatch { .. })
        ));
    }
}
