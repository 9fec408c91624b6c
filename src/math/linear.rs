// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Rank-revealing linear solve for the normal equations.
//!
//! The Gauss-Newton systems built by the tracker are symmetric positive
//! semi-definite but can lose rank (textureless images, gradients with a
//! single orientation). A plain solve would fail on an exactly singular
//! matrix; here pivots below a relative tolerance are treated as zero and
//! the matching solution components are zeroed, so a consistent singular
//! system still yields the useful part of the solution.

use nalgebra::{Const, DimMin, SMatrix, SVector};

use crate::misc::type_aliases::Float;

/// Pivots smaller than this fraction of the largest pivot count as zero.
const PIVOT_RELATIVE_TOLERANCE: Float = 1e-12;

/// Pivots below this count as zero no matter what. A normal matrix whose
/// largest pivot sits at the floating point noise floor (images with
/// gradients cancelled by aliasing) must yield a zero update, not a
/// noise-over-noise one. Pivots of real gradient data are many orders of
/// magnitude above this for normalized intensities.
const PIVOT_ABSOLUTE_TOLERANCE: Float = 1e-9;

/// Solve `lhs * x = rhs` by full-pivot LU and report the detected rank.
///
/// Deficient pivots lead to zeroed solution components instead of a
/// failure, which keeps the solve total. Callers are expected to check
/// the returned rank and log when it is below the system dimension.
pub fn solve_full_piv<const N: usize>(
    lhs: &SMatrix<Float, N, N>,
    rhs: &SVector<Float, N>,
) -> (SVector<Float, N>, usize)
where
    Const<N>: DimMin<Const<N>, Output = Const<N>>,
{
    let lu = lhs.full_piv_lu();
    let l = lu.l();
    let u = lu.u();

    let tolerance =
        (PIVOT_RELATIVE_TOLERANCE * u.diagonal().amax()).max(PIVOT_ABSOLUTE_TOLERANCE);
    let rank = u
        .diagonal()
        .iter()
        .filter(|pivot| pivot.abs() > tolerance)
        .count();

    // P * lhs * Q = L * U, so with w = P * rhs:
    // solve L * y = w (unit lower triangular), then U * z = y, then x = Q * z.
    let mut w = *rhs;
    lu.p().permute_rows(&mut w);
    for i in 0..N {
        for j in 0..i {
            let w_j = w[j];
            w[i] -= l[(i, j)] * w_j;
        }
    }

    let mut z = SVector::<Float, N>::zeros();
    for i in (0..N).rev() {
        let pivot = u[(i, i)];
        if pivot.abs() > tolerance {
            let mut sum = w[i];
            for j in (i + 1)..N {
                sum -= u[(i, j)] * z[j];
            }
            z[i] = sum / pivot;
        }
    }

    lu.q().inv_permute_rows(&mut z);
    (z, rank)
}

// TESTS #############################################################
