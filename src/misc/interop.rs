// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interoperability conversions between the image and matrix types.
//!
//! The tracker works on `DMatrix<f32>` grids: grayscale normalized to
//! [0,1] and depth in meters with NaN marking missing cells. These
//! functions bridge from the `image` crate representations produced by
//! whatever decoding the caller performs.

use image::{GrayImage, ImageBuffer, Luma};
use nalgebra::DMatrix;

use crate::misc::type_aliases::Grid;

/// Depth scale of 16 bits depth images in the TUM RGB-D dataset.
pub const TUM_DEPTH_SCALE: f32 = 5000.0;

/// Convert an 8-bit grayscale image into a float matrix normalized to [0,1].
///
/// Performs a transposition to accomodate for the
/// column major matrix into the row major image.
pub fn grey_from_image(img: &GrayImage) -> Grid {
    let (width, height) = img.dimensions();
    DMatrix::from_fn(height as usize, width as usize, |v, u| {
        f32::from(img.get_pixel(u as u32, v as u32)[0]) / 255.0
    })
}

/// Convert a 16-bit depth image into a metric depth matrix.
///
/// A zero cell means the sensor has no measurement there and becomes NaN.
/// `depth_scale` is the number of integer units per meter,
/// 5000 for the TUM RGB-D dataset.
pub fn depth_from_image(img: &ImageBuffer<Luma<u16>, Vec<u16>>, depth_scale: f32) -> Grid {
    let (width, height) = img.dimensions();
    DMatrix::from_fn(height as usize, width as usize, |v, u| {
        let raw = img.get_pixel(u as u32, v as u32)[0];
        if raw == 0 {
            f32::NAN
        } else {
            f32::from(raw) / depth_scale
        }
    })
}

/// Convert a normalized float matrix back into an 8-bit grayscale image.
/// Inverse operation of `grey_from_image`, values clamped to [0,1].
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn image_from_grey(mat: &Grid) -> GrayImage {
    let (nb_rows, nb_cols) = mat.shape();
    let mut img_buf = GrayImage::new(nb_cols as u32, nb_rows as u32);
    for (x, y, pixel) in img_buf.enumerate_pixels_mut() {
        let intensity = mat[(y as usize, x as usize)].max(0.0).min(1.0);
        *pixel = Luma([(255.0 * intensity).round() as u8]);
    }
    img_buf
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn grey_normalization() {
        let mut img = GrayImage::new(3, 2);
        img.put_pixel(1, 0, Luma([255]));
        img.put_pixel(2, 1, Luma([51]));
        let mat = grey_from_image(&img);
        assert_eq!(mat.shape(), (2, 3));
        assert_eq!(mat[(0, 1)], 1.0);
        assert_eq!(mat[(1, 2)], 0.2);
        assert_eq!(mat[(0, 0)], 0.0);
    }

    #[test]
    fn depth_zero_is_nan() {
        let mut img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::new(2, 2);
        img.put_pixel(0, 0, Luma([5000]));
        img.put_pixel(1, 1, Luma([2500]));
        let mat = depth_from_image(&img, TUM_DEPTH_SCALE);
        assert_eq!(mat[(0, 0)], 1.0);
        assert_eq!(mat[(1, 1)], 0.5);
        assert!(mat[(0, 1)].is_nan());
        assert!(mat[(1, 0)].is_nan());
    }

    #[test]
    fn grey_image_round_trip() {
        let mut img = GrayImage::new(4, 3);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Luma([(17 * (x + 4 * y)) as u8]);
        }
        let back = image_from_grey(&grey_from_image(&img));
        assert_eq!(img, back);
    }
}
