//! # Progressive reconstruction
//!
//! Rebuilds one centered sample from a growing prefix of the component basis. For
//! `k = 1..=total_components` the reconstruction is `(c · W_kᵀ) · W_k + mean`. Since
//! `W_k` only gains one row per step, [`ProgressiveFrames`] keeps a running sum and
//! adds `(c · v_k) v_k` per frame instead of redoing the product.

use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{FacePcaError, Result};
use crate::pca::{inverse_project, project_sample};

/// Converts a reconstructed intensity to a pixel: clamped to `[0, 255]` and
/// truncated toward zero. NaN maps to 0.
pub fn to_pixel(value: f64) -> u8 {
    num_traits::cast(value.clamp(0.0, 255.0)).unwrap_or(0)
}

/// One reconstruction step.
#[derive(Debug, Clone)]
pub struct Frame {
    component_count: usize,
    pixels: Array2<u8>,
    mse: f64,
}

impl Frame {
    /// Number of leading components used for this frame.
    pub fn component_count(&self) -> usize {
        self.component_count
    }

    /// Pixels as a `height × width` array.
    pub fn pixels(&self) -> &Array2<u8> {
        &self.pixels
    }

    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }

    /// Mean squared error of the unquantized reconstruction against the target.
    pub fn mse(&self) -> f64 {
        self.mse
    }

    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width() as u32, self.height() as u32, |x, y| {
            image::Luma([self.pixels[[y as usize, x as usize]]])
        })
    }

    /// Gray replicated across three channels.
    pub fn to_rgb_image(&self) -> RgbImage {
        DynamicImage::ImageLuma8(self.to_gray_image()).to_rgb8()
    }
}

pub struct Reconstructor<'a> {
    centered: ArrayView1<'a, f64>,
    vt: ArrayView2<'a, f64>,
    mean: ArrayView1<'a, f64>,
    width: usize,
    height: usize,
}

impl<'a> Reconstructor<'a> {
    /// `centered` is the target minus `mean`; `vt` holds components as rows.
    pub fn new(
        centered: ArrayView1<'a, f64>,
        vt: ArrayView2<'a, f64>,
        mean: ArrayView1<'a, f64>,
        (width, height): (u32, u32),
    ) -> Result<Self> {
        let n_features = vt.ncols();
        for found in [centered.len(), mean.len(), width as usize * height as usize] {
            if found != n_features {
                return Err(FacePcaError::DimensionMismatch {
                    expected: n_features,
                    found,
                });
            }
        }
        if vt.nrows() == 0 {
            return Err(FacePcaError::InvalidComponentCount {
                requested: 1,
                available: 0,
            });
        }

        Ok(Reconstructor {
            centered,
            vt,
            mean,
            width: width as usize,
            height: height as usize,
        })
    }

    pub fn total_components(&self) -> usize {
        self.vt.nrows()
    }

    /// Reconstruction with the first `k` components, computed directly.
    pub fn reconstruct_at(&self, k: usize) -> Result<Array1<f64>> {
        let coords = project_sample(self.centered, self.vt, k)?;
        let restored = inverse_project(coords.view(), self.vt)?;
        Ok(restored + &self.mean)
    }

    pub fn frame_at(&self, k: usize) -> Result<Frame> {
        let values = self.reconstruct_at(k)?;
        Ok(self.frame(k, &values))
    }

    /// Frames for `k = 1..=total_components`, in order.
    pub fn frames(&self) -> ProgressiveFrames<'a> {
        ProgressiveFrames {
            centered: self.centered,
            vt: self.vt,
            mean: self.mean,
            width: self.width,
            height: self.height,
            next_component: 0,
            accumulator: self.mean.to_owned(),
        }
    }

    fn frame(&self, k: usize, values: &Array1<f64>) -> Frame {
        build_frame(k, values, self.centered, self.mean, self.width, self.height)
    }
}

/// Lazily produced frames with a running reconstruction sum.
pub struct ProgressiveFrames<'a> {
    centered: ArrayView1<'a, f64>,
    vt: ArrayView2<'a, f64>,
    mean: ArrayView1<'a, f64>,
    width: usize,
    height: usize,
    next_component: usize,
    accumulator: Array1<f64>,
}

impl Iterator for ProgressiveFrames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.next_component >= self.vt.nrows() {
            return None;
        }

        let component = self.vt.row(self.next_component);
        let coefficient = component.dot(&self.centered);
        self.accumulator.scaled_add(coefficient, &component);
        self.next_component += 1;

        Some(build_frame(
            self.next_component,
            &self.accumulator,
            self.centered,
            self.mean,
            self.width,
            self.height,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.vt.nrows() - self.next_component;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ProgressiveFrames<'_> {}

fn build_frame(
    k: usize,
    values: &Array1<f64>,
    centered: ArrayView1<f64>,
    mean: ArrayView1<f64>,
    width: usize,
    height: usize,
) -> Frame {
    // values - (centered + mean) == (values - mean) - centered
    let mse = values
        .iter()
        .zip(mean.iter())
        .zip(centered.iter())
        .map(|((&v, &m), &c)| {
            let diff = v - m - c;
            diff * diff
        })
        .sum::<f64>()
        / values.len() as f64;

    let pixels = Array2::from_shape_fn((height, width), |(r, c)| to_pixel(values[r * width + c]));

    Frame {
        component_count: k,
        pixels,
        mse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svd::{decompose, NalgebraSVD};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn rotation_basis() -> Array2<f64> {
        let h = std::f64::consts::FRAC_1_SQRT_2;
        array![
            [h, h, 0.0, 0.0],
            [h, -h, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0]
        ]
    }

    #[test]
    fn test_to_pixel() {
        assert_eq!(to_pixel(-3.0), 0);
        assert_eq!(to_pixel(12.9), 12);
        assert_eq!(to_pixel(300.0), 255);
        assert_eq!(to_pixel(f64::NAN), 0);
    }

    #[test]
    fn test_frame_count_and_shape() {
        let vt = rotation_basis();
        let mean = array![100.5, 100.5, 100.5, 100.5];
        let centered = array![10.0, -20.0, 5.0, 0.0];
        let r = Reconstructor::new(centered.view(), vt.view(), mean.view(), (2, 2)).unwrap();

        let frames: Vec<Frame> = r.frames().collect();
        assert_eq!(frames.len(), r.total_components());
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.component_count(), i + 1);
            assert_eq!(frame.pixels().dim(), (2, 2));
        }
        assert_eq!(frames[3].pixels(), &array![[110, 80], [105, 100]]);
    }

    #[test]
    fn test_incremental_matches_direct() {
        let vt = rotation_basis();
        let mean = array![50.25, 60.25, 70.25, 80.25];
        let centered = array![3.0, 9.0, -4.0, 2.0];
        let r = Reconstructor::new(centered.view(), vt.view(), mean.view(), (4, 1)).unwrap();

        for (frame, k) in r.frames().zip(1..) {
            let direct = r.frame_at(k).unwrap();
            assert_eq!(frame.pixels(), direct.pixels());
            assert_abs_diff_eq!(frame.mse(), direct.mse(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_full_rank_round_trip_and_monotone_error() {
        let data = array![
            [12.0, 40.0, 200.0, 7.0, 90.0, 33.0],
            [80.0, 20.0, 150.0, 60.0, 10.0, 99.0],
            [45.0, 75.0, 30.0, 120.0, 66.0, 18.0]
        ];
        let mean = data.mean_axis(ndarray::Axis(0)).unwrap();
        let std = data.std_axis(ndarray::Axis(0), 0.0);
        let standardized = (&data - &mean) / &std;
        let d = decompose(&NalgebraSVD, standardized.view(), true).unwrap();

        let target = data.row(1).to_owned();
        let centered = &target - &mean;
        let r = Reconstructor::new(centered.view(), d.vt().view(), mean.view(), (3, 2)).unwrap();

        let full = r.reconstruct_at(r.total_components()).unwrap();
        for (a, b) in full.iter().zip(target.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }

        let frames: Vec<Frame> = r.frames().collect();
        assert_eq!(frames.len(), 6);
        for w in frames.windows(2) {
            assert!(w[1].mse() <= w[0].mse() + 1e-9);
        }
        assert_abs_diff_eq!(frames[5].mse(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_checks() {
        let vt = rotation_basis();
        let mean = array![0.0, 0.0, 0.0, 0.0];
        let centered = array![1.0, 2.0, 3.0];
        assert!(matches!(
            Reconstructor::new(centered.view(), vt.view(), mean.view(), (2, 2)),
            Err(FacePcaError::DimensionMismatch { expected: 4, found: 3 })
        ));

        let centered = array![1.0, 2.0, 3.0, 4.0];
        assert!(matches!(
            Reconstructor::new(centered.view(), vt.view(), mean.view(), (3, 3)),
            Err(FacePcaError::DimensionMismatch { expected: 4, found: 9 })
        ));
    }

    #[test]
    fn test_rgb_frame_replicates_gray() {
        let vt = rotation_basis();
        let mean = array![10.0, 20.0, 30.0, 40.0];
        let centered = array![0.0, 0.0, 0.0, 0.0];
        let r = Reconstructor::new(centered.view(), vt.view(), mean.view(), (2, 2)).unwrap();
        let frame = r.frame_at(1).unwrap();

        let rgb = frame.to_rgb_image();
        assert_eq!(rgb.dimensions(), (2, 2));
        assert_eq!(rgb.get_pixel(1, 0).0, [20, 20, 20]);
        assert_eq!(rgb.get_pixel(0, 1).0, [30, 30, 30]);
    }
}
