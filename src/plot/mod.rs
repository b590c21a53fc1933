use std::path::Path;

use image::{Rgb, RgbImage};
use log::info;
use ndarray::ArrayView2;

use crate::error::{FacePcaError, Result};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([160, 160, 160]);
const MARKER: Rgb<u8> = Rgb([31, 119, 180]);

/// Scatter of a two component projection, rendered to a raster image.
#[derive(Debug, Clone)]
pub struct ScatterPlot {
    width: u32,
    height: u32,
    margin: u32,
    marker_radius: i64,
}

impl Default for ScatterPlot {
    fn default() -> Self {
        Self {
            width: 480,
            height: 480,
            margin: 24,
            marker_radius: 3,
        }
    }
}

impl ScatterPlot {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn margin(mut self, margin: u32) -> Self {
        self.margin = margin;
        self
    }

    /// Pixel position of every point, in row order.
    pub fn layout(&self, points: ArrayView2<f64>) -> Result<Vec<(u32, u32)>> {
        let bounds = self.bounds(points)?;
        Ok(points
            .rows()
            .into_iter()
            .map(|p| self.to_pixel(&bounds, p[0], p[1]))
            .collect())
    }

    pub fn render(&self, points: ArrayView2<f64>) -> Result<RgbImage> {
        let bounds = self.bounds(points)?;
        let mut img = RgbImage::from_pixel(self.width, self.height, BACKGROUND);

        if bounds.x_min <= 0.0 && 0.0 <= bounds.x_max {
            let (x, _) = self.to_pixel(&bounds, 0.0, bounds.y_min);
            for y in 0..self.height {
                img.put_pixel(x, y, AXIS);
            }
        }
        if bounds.y_min <= 0.0 && 0.0 <= bounds.y_max {
            let (_, y) = self.to_pixel(&bounds, bounds.x_min, 0.0);
            for x in 0..self.width {
                img.put_pixel(x, y, AXIS);
            }
        }

        for p in points.rows() {
            let (cx, cy) = self.to_pixel(&bounds, p[0], p[1]);
            self.draw_marker(&mut img, cx as i64, cy as i64);
        }

        Ok(img)
    }

    pub fn save(&self, points: ArrayView2<f64>, path: &Path) -> Result<()> {
        let img = self.render(points)?;
        img.save(path)?;
        info!("Saved projection scatter to {}", path.display());
        Ok(())
    }

    fn draw_marker(&self, img: &mut RgbImage, cx: i64, cy: i64) {
        let r = self.marker_radius;
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy > r * r {
                    continue;
                }
                let (x, y) = (cx + dx, cy + dy);
                if x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64 {
                    img.put_pixel(x as u32, y as u32, MARKER);
                }
            }
        }
    }

    fn bounds(&self, points: ArrayView2<f64>) -> Result<Bounds> {
        if points.ncols() != 2 {
            return Err(FacePcaError::DimensionMismatch {
                expected: 2,
                found: points.ncols(),
            });
        }
        if points.nrows() == 0 {
            return Err(FacePcaError::InsufficientData {
                found: 0,
                required: 1,
            });
        }
        if points.iter().any(|v| !v.is_finite()) {
            return Err(FacePcaError::InvalidConfig(
                "scatter points must be finite".to_string(),
            ));
        }
        if self.width <= 2 * self.margin || self.height <= 2 * self.margin {
            return Err(FacePcaError::InvalidConfig(format!(
                "plot of {}x{} leaves no room inside a margin of {}",
                self.width, self.height, self.margin
            )));
        }

        let (x_min, x_max) = padded_range(points.column(0).iter().copied());
        let (y_min, y_max) = padded_range(points.column(1).iter().copied());
        Ok(Bounds {
            x_min,
            x_max,
            y_min,
            y_max,
        })
    }

    fn to_pixel(&self, bounds: &Bounds, x: f64, y: f64) -> (u32, u32) {
        let inner_w = (self.width - 2 * self.margin - 1) as f64;
        let inner_h = (self.height - 2 * self.margin - 1) as f64;
        let fx = (x - bounds.x_min) / (bounds.x_max - bounds.x_min);
        let fy = (y - bounds.y_min) / (bounds.y_max - bounds.y_min);
        let px = self.margin as f64 + (fx * inner_w).round();
        // Image rows grow downwards.
        let py = (self.height - self.margin - 1) as f64 - (fy * inner_h).round();
        (px as u32, py as u32)
    }
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if max > min {
        (min, max)
    } else {
        (min - 1.0, max + 1.0)
    }
}
