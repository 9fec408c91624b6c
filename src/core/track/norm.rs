//! Robust norms for re-weighting photometric residuals.

use crate::misc::type_aliases::Float;

/// Robust norm choice for the iteratively re-weighted least squares.
///
/// Tukey fully rejects residuals beyond the scale parameter, which is
/// what makes the tracker resilient to occlusions and depth outliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobustNorm {
    /// Tukey biweight: `(1 - (r/c)^2)^2` inside `|r| <= c`, zero outside.
    Tukey,
    /// L1 norm: weight `1 / |r|`, one at zero residual.
    L1,
}

impl Default for RobustNorm {
    fn default() -> RobustNorm {
        RobustNorm::Tukey
    }
}

impl RobustNorm {
    /// Weight of a residual at the given norm scale.
    pub fn weight(self, residual: Float, scale: Float) -> Float {
        match self {
            RobustNorm::Tukey => {
                let ratio = residual / scale;
                let cutoff = 1.0 - ratio * ratio;
                if residual.abs() <= scale {
                    cutoff * cutoff
                } else {
                    0.0
                }
            }
            RobustNorm::L1 => {
                let abs_r = residual.abs();
                if abs_r == 0.0 {
                    1.0
                } else {
                    1.0 / abs_r
                }
            }
        }
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use quickcheck_macros;

    #[test]
    fn tukey_weight_shape() {
        let norm = RobustNorm::Tukey;
        assert_eq!(norm.weight(0.0, 0.04), 1.0);
        assert_eq!(norm.weight(0.04, 0.04), 0.0);
        assert_eq!(norm.weight(-0.04, 0.04), 0.0);
        assert_eq!(norm.weight(1.0, 0.04), 0.0);
        let halfway = norm.weight(0.02, 0.04);
        assert!((halfway - 0.5625).abs() < 1e-12);
    }

    #[test]
    fn l1_weight_shape() {
        let norm = RobustNorm::L1;
        assert_eq!(norm.weight(0.0, 0.04), 1.0);
        assert_eq!(norm.weight(0.5, 0.04), 2.0);
        assert_eq!(norm.weight(-0.25, 0.04), 4.0);
    }

    // PROPERTY TESTS ################################################

    #[quickcheck_macros::quickcheck]
    fn tukey_support_is_compact(residual: Float) -> bool {
        if !residual.is_finite() {
            return true;
        }
        let weight = RobustNorm::Tukey.weight(residual, 0.04);
        if residual.abs() > 0.04 {
            weight == 0.0
        } else {
            (0.0..=1.0).contains(&weight)
        }
    }
}
