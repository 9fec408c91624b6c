// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parallel reduction of per-pixel contributions into normal equations.
//!
//! The accumulator is an associative monoid: per-pixel contributions add
//! element-wise and partial accumulators join by summation. The pixel
//! index range is split into fixed chunks evaluated on the rayon pool;
//! partials are joined in chunk-index order, which keeps the result
//! reproducible for identical inputs whatever the thread count.

use rayon::prelude::*;

use crate::core::track::residual::EvalContext;
use crate::misc::type_aliases::{Float, Mat6, Vec6};

/// Number of pixels each parallel work item processes. A throughput
/// versus scheduling-overhead tradeoff; does not affect the result.
pub const CHUNK_SIZE: usize = 10_000;

/// Sums of the per-pixel contributions of one solver iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    /// Robustly weighted normal matrix, sum of `w * J * J^t`.
    pub lhs: Mat6,
    /// Robustly weighted right-hand side, sum of `w * y * J`.
    pub rhs: Vec6,
    /// Unweighted normal matrix, sum of `J * J^t`; the covariance of the
    /// final estimate is its inverse.
    pub hessian: Mat6,
    /// Sum of squared residuals.
    pub sse: Float,
    /// Number of contributing pixels.
    pub nb_obs: u32,
}

impl Accumulator {
    /// Initialize with zeros.
    pub fn new() -> Accumulator {
        Accumulator {
            lhs: Mat6::zeros(),
            rhs: Vec6::zeros(),
            hessian: Mat6::zeros(),
            sse: 0.0,
            nb_obs: 0,
        }
    }

    /// Add the contribution of one pixel.
    ///
    /// A zero robust weight removes the pixel from the normal equations
    /// but still counts it in the unweighted Hessian, the squared error
    /// and the observation count.
    pub fn add(&mut self, jacobian: &Vec6, residual: Float, weight: Float) {
        let jjt = jacobian * jacobian.transpose();
        self.hessian += jjt;
        self.lhs += weight * jjt;
        self.rhs += (weight * residual) * jacobian;
        self.sse += residual * residual;
        self.nb_obs += 1;
    }

    /// Join with another accumulator.
    pub fn join(&mut self, other: &Accumulator) {
        self.lhs += other.lhs;
        self.rhs += other.rhs;
        self.hessian += other.hessian;
        self.sse += other.sse;
        self.nb_obs += other.nb_obs;
    }

    /// Root mean square of the accumulated residuals.
    pub fn rms(&self) -> Float {
        (self.sse / Float::from(self.nb_obs)).sqrt()
    }
}

impl Default for Accumulator {
    fn default() -> Accumulator {
        Accumulator::new()
    }
}

/// Evaluate every pixel of the reference depth map and reduce the
/// contributions into a single accumulator.
pub fn reduce(context: &EvalContext) -> Accumulator {
    let (nb_rows, nb_cols) = context.ref_depth.shape();
    let nb_pixels = nb_rows * nb_cols;
    let nb_chunks = (nb_pixels + CHUNK_SIZE - 1) / CHUNK_SIZE;

    let partials: Vec<Accumulator> = (0..nb_chunks)
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * CHUNK_SIZE;
            let end = nb_pixels.min(start + CHUNK_SIZE);
            let mut acc = Accumulator::new();
            context.accumulate_range(start..end, &mut acc);
            acc
        })
        .collect();

    // Partials arrive ordered by chunk index; joining left to right
    // fixes the floating point summation order.
    let mut total = Accumulator::new();
    for partial in &partials {
        total.join(partial);
    }
    total
}

// TESTS #############################################################
