//! Bilinear intensity sampling.

use crate::misc::type_aliases::{Float, Grid};

/// Sample an image at floating point coordinates with bilinear
/// interpolation over the four-pixel neighborhood.
///
/// Coordinates are clamped into `[2, width - 2] x [2, height - 2]` before
/// truncation so the four accessed pixels are always in bounds; callers
/// are expected to have checked their own margins already, so a
/// coordinate outside the looser `[0, width - 2] x [0, height - 2]` box
/// is reported as a diagnostic. Sampling itself never fails.
pub fn interpolate(x: Float, y: Float, image: &Grid) -> f32 {
    let (nb_rows, nb_cols) = image.shape();
    let width = nb_cols as f32;
    let height = nb_rows as f32;
    let mut x = x as f32;
    let mut y = y as f32;

    if !(x >= 0.0 && y >= 0.0 && x <= width - 2.0 && y <= height - 2.0) {
        log::error!("bad sample point: {}, {}", x, y);
    }

    x = x.min(width - 2.0).max(2.0);
    y = y.min(height - 2.0).max(2.0);

    // Top-left corner of the interpolation cell.
    let px = x as usize;
    let py = y as usize;
    let ax = x - px as f32;
    let ay = y - py as f32;

    let p00 = image[(py, px)];
    let p01 = image[(py, px + 1)];
    let p10 = image[(py + 1, px)];
    let p11 = image[(py + 1, px + 1)];

    (1.0 - ax) * ((1.0 - ay) * p00 + ay * p10) + ax * ((1.0 - ay) * p01 + ay * p11)
}

// TESTS #############################################################
