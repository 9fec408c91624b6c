//! Pinhole camera intrinsics and their multi-resolution scaling.

use crate::misc::type_aliases::{Float, Mat3, Vec4};

/// Pinhole intrinsics: focal lengths on the diagonal of K,
/// principal point in the last column.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct Intrinsics {
    pub fx: Float,
    pub fy: Float,
    pub cx: Float,
    pub cy: Float,
}

impl Intrinsics {
    pub fn new(fx: Float, fy: Float, cx: Float, cy: Float) -> Intrinsics {
        Intrinsics { fx, fy, cx, cy }
    }

    /// Read the parameters out of a 3x3 calibration matrix.
    pub fn from_matrix(k: &Mat3) -> Intrinsics {
        Intrinsics {
            fx: k.m11,
            fy: k.m22,
            cx: k.m13,
            cy: k.m23,
        }
    }

    /// The 3x3 calibration matrix K.
    #[rustfmt::skip]
    pub fn matrix(&self) -> Mat3 {
        Mat3::new(
            self.fx, 0.0,     self.cx,
            0.0,     self.fy, self.cy,
            0.0,     0.0,     1.0,
        )
    }

    /// Intrinsics of the same camera imaging at another resolution.
    pub fn scaled(&self, scale: Float) -> Intrinsics {
        Intrinsics {
            fx: scale * self.fx,
            fy: scale * self.fy,
            cx: scale * self.cx,
            cy: scale * self.cy,
        }
    }

    /// Intrinsics of each level of a pyramid with halved resolutions,
    /// finest (original resolution) first.
    pub fn multi_res(self, nb_levels: usize) -> Vec<Intrinsics> {
        let mut intrinsics = Vec::new();
        if nb_levels > 0 {
            intrinsics.push(self);
            for _ in 1..nb_levels {
                let new = intrinsics.last().unwrap().scaled(0.5);
                intrinsics.push(new);
            }
        }
        intrinsics
    }

    /// Project a homogeneous 3D camera-frame point to pixel coordinates.
    pub fn project(&self, point: &Vec4) -> (Float, Float) {
        (
            point.x * self.fx / point.z + self.cx,
            point.y * self.fy / point.z + self.cy,
        )
    }

    /// Back-project pixel (u, v) at a given depth into a homogeneous
    /// 3D camera-frame point.
    pub fn back_project(&self, u: Float, v: Float, depth: Float) -> Vec4 {
        Vec4::new(
            depth * (u - self.cx) / self.fx,
            depth * (v - self.cy) / self.fy,
            depth,
            1.0,
        )
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;
    use quickcheck_macros;

    fn gen_intrinsics() -> Intrinsics {
        Intrinsics::new(250.0, 245.0, 160.5, 120.5)
    }

    #[test]
    fn matrix_round_trip() {
        let intrinsics = gen_intrinsics();
        assert_eq!(intrinsics, Intrinsics::from_matrix(&intrinsics.matrix()));
    }

    #[test]
    fn multi_res_halves_everything() {
        let levels = gen_intrinsics().multi_res(3);
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[1].fx, 125.0);
        assert_eq!(levels[2].fx, 62.5);
        assert_eq!(levels[2].cx, 160.5 / 4.0);
        assert_eq!(levels[2].cy, 120.5 / 4.0);
    }

    // PROPERTY TESTS ################################################

    #[quickcheck_macros::quickcheck]
    fn project_back_project_round_trip(u: Float, v: Float, depth: Float) -> bool {
        if !(u.is_finite() && v.is_finite() && depth.is_finite()) {
            return true;
        }
        if u.abs() > 1e4 || v.abs() > 1e4 || depth <= 0.01 || depth > 1e3 {
            return true;
        }
        let intrinsics = gen_intrinsics();
        let (u_back, v_back) = intrinsics.project(&intrinsics.back_project(u, v, depth));
        approx::relative_eq!(u, u_back, epsilon = 1e-9, max_relative = 1e-9)
            && approx::relative_eq!(v, v_back, epsilon = 1e-9, max_relative = 1e-9)
    }
}
