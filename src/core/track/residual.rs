//! Per-pixel photometric residual and Jacobian evaluation.
//!
//! Every valid cell of the reference depth map is back-projected, moved
//! through the current motion estimate, projected into both grayscale
//! images and compared photometrically. The Jacobian couples the ESM
//! averaged image gradient with the projection derivative and the SE(3)
//! generators, laid out translation first, rotation last, matching
//! `math::se3`.

use std::ops::Range;

use crate::core::camera::Intrinsics;
use crate::core::interp;
use crate::core::track::norm::RobustNorm;
use crate::core::track::reducer::Accumulator;
use crate::misc::helper::div_rem;
use crate::misc::type_aliases::{Float, Grid, Mat2x3, Mat3x4, Mat4, RowVec2, Vec6};

/// Everything one solver iteration reads: the three current-level
/// images, the camera models, the motion being linearized and the
/// residual filtering options. Shared read-only by all worker threads.
pub struct EvalContext<'a> {
    /// Live grayscale image at the current pyramid level.
    pub live_grey: &'a Grid,
    /// Reference (keyframe) grayscale image at the current pyramid level.
    pub ref_grey: &'a Grid,
    /// Reference depth map at the current pyramid level.
    pub ref_depth: &'a Grid,
    /// Live grayscale intrinsics.
    pub klg: Intrinsics,
    /// Reference grayscale intrinsics.
    pub krg: Intrinsics,
    /// Reference depth intrinsics.
    pub krd: Intrinsics,
    /// Depth-to-grayscale extrinsic of the reference rig.
    pub tgd: Mat4,
    /// Current live-from-reference motion estimate.
    pub tlr: Mat4,
    /// Precomputed `K_lg * T_lr` (3x4).
    pub klg_tlr: Mat3x4,
    /// Robust norm and its scale at the current pyramid level.
    pub norm: RobustNorm,
    pub norm_scale: Float,
    /// Skip residuals touching intensities exactly 0 or 1.
    pub discard_saturated: bool,
    /// Depth validity range, exclusive on both ends.
    pub min_depth: f32,
    pub max_depth: f32,
}

impl<'a> EvalContext<'a> {
    /// Accumulate the contributions of a flat range of depth pixel indices.
    pub fn accumulate_range(&self, range: Range<usize>, acc: &mut Accumulator) {
        let nb_cols = self.ref_depth.ncols();
        for index in range {
            let (v, u) = div_rem(index, nb_cols);
            self.accumulate_pixel(u, v, acc);
        }
    }

    /// Contribution of reference depth pixel (u, v), if it has one.
    fn accumulate_pixel(&self, u: usize, v: usize, acc: &mut Accumulator) {
        let depth = self.ref_depth[(v, u)];
        if depth.is_nan() {
            return;
        }
        if depth <= self.min_depth || depth >= self.max_depth {
            return;
        }

        // 3D point in the reference depth camera, then in the reference
        // grayscale frame. Tgd is the identity when depth is aligned.
        let p_rd = self
            .krd
            .back_project(u as Float, v as Float, Float::from(depth));
        let p_rg = self.tgd * p_rd;

        // Reproject into the reference grayscale image.
        let (x_rg, y_rg) = self.krg.project(&p_rg);
        if out_of_margin(x_rg, y_rg, self.ref_grey) {
            return;
        }

        // Move into the live frame and project there too.
        let p_lg = self.tlr * p_rg;
        let (x_lg, y_lg) = self.klg.project(&p_lg);
        if out_of_margin(x_lg, y_lg, self.live_grey) {
            return;
        }

        let intensity_live = interp::interpolate(x_lg, y_lg, self.live_grey);
        let intensity_ref = interp::interpolate(x_rg, y_rg, self.ref_grey);

        if self.discard_saturated && (saturated(intensity_live) || saturated(intensity_ref)) {
            return;
        }

        let residual = Float::from(intensity_live) - Float::from(intensity_ref);

        // ESM gradient: average the live (forward compositional) and
        // reference (inverse compositional) image derivatives.
        let grad_live = central_gradient(x_lg, y_lg, self.live_grey);
        let grad_ref = central_gradient(x_rg, y_rg, self.ref_grey);
        let grad_esm = 0.5 * (grad_live + grad_ref);

        // Projection and dehomogenization derivative at K_lg * P_lg.
        let kpl_x = self.klg.fx * p_lg.x + self.klg.cx * p_lg.z;
        let kpl_y = self.klg.fy * p_lg.y + self.klg.cy * p_lg.z;
        let kpl_z = p_lg.z;
        #[rustfmt::skip]
        let d_pl = Mat2x3::new(
            1.0 / kpl_z, 0.0,         -kpl_x / (kpl_z * kpl_z),
            0.0,         1.0 / kpl_z, -kpl_y / (kpl_z * kpl_z),
        );

        let a = grad_esm * d_pl * self.klg_tlr;

        // J = a * gen_i * P_rg over the six SE(3) generators,
        // translation first, rotation last.
        let j = Vec6::new(
            a[0],
            a[1],
            a[2],
            -a[1] * p_rg.z + a[2] * p_rg.y,
            a[0] * p_rg.z - a[2] * p_rg.x,
            -a[0] * p_rg.y + a[1] * p_rg.x,
        );

        let weight = self.norm.weight(residual, self.norm_scale);
        acc.add(&j, residual, weight);
    }
}

/// Reprojections closer than 3 pixels to a border are dropped: the
/// sampler and the gradient stencils need the margin.
fn out_of_margin(x: Float, y: Float, image: &Grid) -> bool {
    let (nb_rows, nb_cols) = image.shape();
    x < 2.0 || x >= (nb_cols - 3) as Float || y < 2.0 || y >= (nb_rows - 3) as Float
}

fn saturated(intensity: f32) -> bool {
    intensity == 0.0 || intensity == 1.0
}

/// Central difference image derivative at unit offsets, sampled bilinearly.
fn central_gradient(x: Float, y: Float, image: &Grid) -> RowVec2 {
    let x_right = interp::interpolate(x + 1.0, y, image);
    let x_left = interp::interpolate(x - 1.0, y, image);
    let y_up = interp::interpolate(x, y - 1.0, image);
    let y_down = interp::interpolate(x, y + 1.0, image);
    RowVec2::new(
        Float::from(x_right - x_left) / 2.0,
        Float::from(y_down - y_up) / 2.0,
    )
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::misc::type_aliases::Iso3;
    use nalgebra::DMatrix;

    fn gen_context<'a>(live: &'a Grid, reference: &'a Grid, depth: &'a Grid) -> EvalContext<'a> {
        let intrinsics = Intrinsics::new(100.0, 100.0, 16.0, 16.0);
        let identity = Iso3::identity().to_homogeneous();
        let klg_tlr = intrinsics.matrix() * identity.fixed_view::<3, 4>(0, 0).into_owned();
        EvalContext {
            live_grey: live,
            ref_grey: reference,
            ref_depth: depth,
            klg: intrinsics,
            krg: intrinsics,
            krd: intrinsics,
            tgd: Iso3::identity().to_homogeneous(),
            tlr: identity,
            klg_tlr,
            norm: RobustNorm::Tukey,
            norm_scale: 0.04,
            discard_saturated: false,
            min_depth: 0.01,
            max_depth: 100.0,
        }
    }

    fn textured_image() -> Grid {
        DMatrix::from_fn(32, 32, |v, u| {
            0.5 + 0.2 * ((u as f32) * 0.4).sin() + 0.1 * ((v as f32) * 0.3).cos()
        })
    }

    #[test]
    fn nan_and_out_of_range_depth_are_skipped() {
        let image = textured_image();
        let mut depth = DMatrix::from_element(32, 32, 1.0_f32);
        depth[(10, 10)] = f32::NAN;
        depth[(10, 11)] = 0.005; // below min_depth
        depth[(10, 12)] = 150.0; // above max_depth
        let context = gen_context(&image, &image, &depth);

        let mut acc = Accumulator::new();
        context.accumulate_range(10 * 32 + 10..10 * 32 + 13, &mut acc);
        assert_eq!(acc.nb_obs, 0);

        context.accumulate_range(10 * 32 + 13..10 * 32 + 14, &mut acc);
        assert_eq!(acc.nb_obs, 1);
    }

    #[test]
    fn border_pixels_are_skipped() {
        let image = textured_image();
        let depth = DMatrix::from_element(32, 32, 1.0_f32);
        let context = gen_context(&image, &image, &depth);

        // With identity motion and equal intrinsics, each depth pixel
        // reprojects onto itself: only [2, 28] x [2, 28] survives.
        let mut acc = Accumulator::new();
        context.accumulate_range(0..32 * 32, &mut acc);
        assert_eq!(acc.nb_obs, 27 * 27);
    }

    #[test]
    fn identity_alignment_has_zero_residuals() {
        let image = textured_image();
        let depth = DMatrix::from_element(32, 32, 1.0_f32);
        let context = gen_context(&image, &image, &depth);
        let mut acc = Accumulator::new();
        context.accumulate_range(0..32 * 32, &mut acc);
        assert!(acc.nb_obs > 0);
        assert_eq!(acc.sse, 0.0);
        assert_eq!(acc.rhs, crate::misc::type_aliases::Vec6::zeros());
        // The Jacobians are not zero though: the normal matrix must carry
        // the image gradient information.
        assert!(acc.lhs.norm() > 0.0);
    }

    #[test]
    fn saturated_intensities_are_discarded() {
        let mut image = textured_image();
        image[(15, 15)] = 0.0;
        image[(15, 16)] = 1.0;
        let depth = DMatrix::from_element(32, 32, 1.0_f32);
        let mut context = gen_context(&image, &image, &depth);

        let mut acc = Accumulator::new();
        context.accumulate_range(15 * 32 + 15..15 * 32 + 17, &mut acc);
        assert_eq!(acc.nb_obs, 2);

        context.discard_saturated = true;
        let mut acc = Accumulator::new();
        context.accumulate_range(15 * 32 + 15..15 * 32 + 17, &mut acc);
        assert_eq!(acc.nb_obs, 0);
    }
}
