// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Generation of multi-resolution image and depth pyramids.
//!
//! Grayscale levels are produced by a 5-tap Gaussian filter evaluated at
//! even coordinates with reflected borders, so pixel `i` of level `l + 1`
//! sits exactly at pixel `2 * i` of level `l` and intrinsics scale by
//! plain halving. Depth levels use a 2x2 mean restricted to finite cells:
//! blurring NaN through a neighborhood would destroy valid measurements.

use nalgebra::DMatrix;

use crate::misc::type_aliases::Grid;

/// Normalized weights of the binomial 5-tap pyramid kernel.
const KERNEL: [f32; 5] = [0.0625, 0.25, 0.375, 0.25, 0.0625];

/// Build the grayscale pyramid of an image, finest level first.
///
/// It consumes the original image to keep it as first level of the
/// pyramid without copy. The pyramid stops early if a level becomes too
/// small to halve, so the result can have fewer than `nb_levels` levels.
pub fn grey_pyramid(img: Grid, nb_levels: usize) -> Vec<Grid> {
    limited_sequence(nb_levels, img, gaussian_halve)
}

/// Build the depth pyramid of a depth map, finest level first.
///
/// Each coarse cell is the mean of the finite cells in the corresponding
/// 2x2 block, or NaN when the whole block is unknown.
pub fn depth_pyramid(depth: Grid, nb_levels: usize) -> Vec<Grid> {
    limited_sequence(nb_levels, depth, |mat| halve(mat, finite_mean))
}

/// Recursively apply a function transforming an image
/// until it's not possible anymore or the max length is reached.
pub fn limited_sequence<F: Fn(&T) -> Option<T>, T>(max_length: usize, data: T, f: F) -> Vec<T> {
    let mut length = 1;
    let f_limited = |x: &T| {
        if length < max_length {
            length += 1;
            f(x)
        } else {
            None
        }
    };
    sequence(data, f_limited)
}

/// Recursively apply a function transforming data
/// until it's not possible anymore.
pub fn sequence<F: FnMut(&T) -> Option<T>, T>(data: T, mut f: F) -> Vec<T> {
    let mut s = vec![data];
    while let Some(new_data) = f(s.last().unwrap()) {
        s.push(new_data);
    }
    s
}

/// Halve the resolution of a matrix by applying a function to each 2x2 block.
///
/// If one size of the matrix is < 2 then this function returns None.
/// If one size is odd, its last line/column is dropped.
pub fn halve<F>(mat: &Grid, f: F) -> Option<Grid>
where
    F: Fn(f32, f32, f32, f32) -> f32,
{
    let (r, c) = mat.shape();
    let half_r = r / 2;
    let half_c = c / 2;
    if half_r == 0 || half_c == 0 {
        None
    } else {
        let half_mat = DMatrix::from_fn(half_r, half_c, |i, j| {
            let a = mat[(2 * i, 2 * j)];
            let b = mat[(2 * i + 1, 2 * j)];
            let c = mat[(2 * i, 2 * j + 1)];
            let d = mat[(2 * i + 1, 2 * j + 1)];
            f(a, b, c, d)
        });
        Some(half_mat)
    }
}

/// Mean of the finite values of a 2x2 block, NaN if there is none.
fn finite_mean(a: f32, b: f32, c: f32, d: f32) -> f32 {
    let mut sum = 0.0;
    let mut count = 0;
    for value in &[a, b, c, d] {
        if value.is_finite() {
            sum += value;
            count += 1;
        }
    }
    if count == 0 {
        f32::NAN
    } else {
        sum / count as f32
    }
}

/// Gaussian-filtered downsampling by 2, evaluated at even coordinates.
fn gaussian_halve(mat: &Grid) -> Option<Grid> {
    let (r, c) = mat.shape();
    let half_r = r / 2;
    let half_c = c / 2;
    if half_r == 0 || half_c == 0 {
        return None;
    }
    let half_mat = DMatrix::from_fn(half_r, half_c, |i, j| {
        let mut sum = 0.0;
        for (ki, wi) in KERNEL.iter().enumerate() {
            let v = reflect_101(2 * i as i64 + ki as i64 - 2, r as i64);
            for (kj, wj) in KERNEL.iter().enumerate() {
                let u = reflect_101(2 * j as i64 + kj as i64 - 2, c as i64);
                sum += wi * wj * mat[(v, u)];
            }
        }
        sum
    });
    Some(half_mat)
}

/// Mirror an index into [0, len) without repeating the border pixel.
fn reflect_101(mut p: i64, len: i64) -> usize {
    if len == 1 {
        return 0;
    }
    if p < 0 {
        p = -p;
    }
    let period = 2 * (len - 1);
    p %= period;
    if p >= len {
        p = period - p;
    }
    p as usize
}

// TESTS #############################################################
