//! Dense Farneback flow through OpenCV.

use image::GrayImage;
use opencv::core::{Mat, Point2f, Scalar, CV_8UC1};
use opencv::prelude::*;

use super::{FlowEstimator, MotionField};
use crate::error::{Error, Result};

/// `calc_optical_flow_farneback` parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FarnebackFlow {
    pub pyr_scale: f64,
    pub levels: i32,
    pub win_size: i32,
    pub iterations: i32,
    pub poly_n: i32,
    pub poly_sigma: f64,
}

impl Default for FarnebackFlow {
    fn default() -> Self {
        Self {
            pyr_scale: 0.5,
            levels: 3,
            win_size: 25,
            iterations: 5,
            poly_n: 7,
            poly_sigma: 1.5,
        }
    }
}

impl FlowEstimator for FarnebackFlow {
    fn name(&self) -> &'static str {
        "farneback"
    }

    fn estimate(&mut self, previous: &GrayImage, current: &GrayImage) -> Result<MotionField> {
        let old = to_mat(previous)?;
        let new = to_mat(current)?;
        let mut flow = Mat::default();
        opencv::video::calc_optical_flow_farneback(
            &old,
            &new,
            &mut flow,
            self.pyr_scale,
            self.levels,
            self.win_size,
            self.iterations,
            self.poly_n,
            self.poly_sigma,
            0,
        )
        .map_err(cv_error)?;

        let (width, height) = current.dimensions();
        let len = (width * height) as usize;
        let mut dx = Vec::with_capacity(len);
        let mut dy = Vec::with_capacity(len);
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                let dir: &Point2f = flow.at_2d(y, x).map_err(cv_error)?;
                dx.push(dir.x);
                dy.push(dir.y);
            }
        }
        MotionField::from_components(width, height, dx, dy)
    }
}

/// Copy a grayscale image into a single-channel 8-bit `Mat`.
pub(crate) fn to_mat(image: &GrayImage) -> Result<Mat> {
    let (width, height) = image.dimensions();
    let mut mat =
        Mat::new_rows_cols_with_default(height as i32, width as i32, CV_8UC1, Scalar::all(0.0))
            .map_err(cv_error)?;
    mat.data_bytes_mut()
        .map_err(cv_error)?
        .copy_from_slice(image.as_raw());
    Ok(mat)
}

pub(crate) fn cv_error(err: opencv::Error) -> Error {
    Error::transient(format!("opencv: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn textured(offset_x: u32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            let sx = x.wrapping_sub(offset_x);
            Luma([(((sx / 4 + y / 4) % 2) * 120 + 60) as u8])
        })
    }

    #[test]
    fn still_pair_has_negligible_flow() -> Result<()> {
        let frame = textured(0);
        let field = FarnebackFlow::default().estimate(&frame, &frame)?;
        assert!(field.magnitudes().iter().all(|m| *m < 0.05));
        Ok(())
    }

    #[test]
    fn horizontal_shift_points_right() -> Result<()> {
        let field = FarnebackFlow::default().estimate(&textured(0), &textured(2))?;
        let (dx, _) = field.vector(32, 32);
        assert!(dx > 1.0);
        Ok(())
    }
}
