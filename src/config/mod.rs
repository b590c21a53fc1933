//! # Run configuration
//!
//! Every knob of a reconstruction run lives in [`ReconstructionConfig`]. The defaults
//! reproduce the classic Yale faces setup: 40×40 samples, a two component scatter,
//! and an MJPG video at 200 frames per second.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;

use crate::error::{FacePcaError, Result};

/// Codecs the video writer knows how to produce.
pub const SUPPORTED_CODECS: &[&str] = &["MJPG"];

/// How the image to reconstruct is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
    /// Row index into the loaded data matrix.
    Index(usize),
    /// Uniform choice among the loaded samples, reproducible for a given seed.
    Seeded(u64),
    /// An image outside the sample pool, loaded with the same resize settings.
    Path(PathBuf),
}

impl Default for TargetSelection {
    fn default() -> Self {
        TargetSelection::Seeded(42)
    }
}

/// What to do when a feature column has zero variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DegeneratePolicy {
    /// Log the offending columns and let NaN/Inf propagate.
    #[default]
    Warn,
    /// Abort standardization with [`FacePcaError::DegenerateFeature`].
    Error,
}

#[derive(Debug, Clone)]
pub struct ReconstructionConfig {
    input_dir: PathBuf,
    resize_dims: (u32, u32),
    resize_filter: FilterType,
    viz_components: usize,
    codec: String,
    fps: f64,
    jpeg_quality: u8,
    output_path: PathBuf,
    scatter_path: Option<PathBuf>,
    target: TargetSelection,
    degenerate_policy: DegeneratePolicy,
    skip_undecodable: bool,
    full_matrices: bool,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("yalefaces"),
            resize_dims: (40, 40),
            resize_filter: FilterType::CatmullRom,
            viz_components: 2,
            codec: "MJPG".to_string(),
            fps: 200.0,
            jpeg_quality: 90,
            output_path: PathBuf::from("reconstruction.avi"),
            scatter_path: None,
            target: TargetSelection::default(),
            degenerate_policy: DegeneratePolicy::default(),
            skip_undecodable: false,
            full_matrices: true,
        }
    }
}

impl ReconstructionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_dir(mut self, input_dir: impl Into<PathBuf>) -> Self {
        self.input_dir = input_dir.into();
        self
    }

    /// Target `(width, height)` every image is resized to before flattening.
    pub fn resize_dims(mut self, width: u32, height: u32) -> Self {
        self.resize_dims = (width, height);
        self
    }

    pub fn resize_filter(mut self, filter: FilterType) -> Self {
        self.resize_filter = filter;
        self
    }

    pub fn viz_components(mut self, viz_components: usize) -> Self {
        self.viz_components = viz_components;
        self
    }

    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    pub fn fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn output_path(mut self, output_path: impl Into<PathBuf>) -> Self {
        self.output_path = output_path.into();
        self
    }

    /// Write the two component scatter to this PNG path.
    pub fn scatter_path(mut self, scatter_path: impl Into<PathBuf>) -> Self {
        self.scatter_path = Some(scatter_path.into());
        self
    }

    pub fn target(mut self, target: TargetSelection) -> Self {
        self.target = target;
        self
    }

    pub fn degenerate_policy(mut self, policy: DegeneratePolicy) -> Self {
        self.degenerate_policy = policy;
        self
    }

    /// Skip files that fail to decode instead of aborting the run.
    pub fn skip_undecodable(mut self, skip: bool) -> Self {
        self.skip_undecodable = skip;
        self
    }

    /// Use the full `D × D` component basis rather than `min(N, D)` components.
    pub fn full_matrices(mut self, full: bool) -> Self {
        self.full_matrices = full;
        self
    }

    pub fn get_input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn get_resize_dims(&self) -> (u32, u32) {
        self.resize_dims
    }

    pub fn get_resize_filter(&self) -> FilterType {
        self.resize_filter
    }

    /// Number of features per sample, `width * height`.
    pub fn feature_count(&self) -> usize {
        self.resize_dims.0 as usize * self.resize_dims.1 as usize
    }

    pub fn get_viz_components(&self) -> usize {
        self.viz_components
    }

    pub fn get_codec(&self) -> &str {
        &self.codec
    }

    pub fn get_fps(&self) -> f64 {
        self.fps
    }

    pub fn get_jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    pub fn get_output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn get_scatter_path(&self) -> Option<&Path> {
        self.scatter_path.as_deref()
    }

    pub fn get_target(&self) -> &TargetSelection {
        &self.target
    }

    pub fn get_degenerate_policy(&self) -> DegeneratePolicy {
        self.degenerate_policy
    }

    pub fn get_skip_undecodable(&self) -> bool {
        self.skip_undecodable
    }

    pub fn get_full_matrices(&self) -> bool {
        self.full_matrices
    }

    pub fn validate(&self) -> Result<()> {
        let (width, height) = self.resize_dims;
        if width == 0 || height == 0 {
            return Err(FacePcaError::InvalidConfig(format!(
                "resize dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        if self.viz_components == 0 {
            return Err(FacePcaError::InvalidConfig(
                "viz_components must be at least 1".to_string(),
            ));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(FacePcaError::InvalidConfig(format!(
                "fps must be a positive finite number, got {}",
                self.fps
            )));
        }
        if self.codec.len() != 4 || !self.codec.is_ascii() {
            return Err(FacePcaError::InvalidConfig(format!(
                "codec must be a four character code, got {:?}",
                self.codec
            )));
        }
        if !SUPPORTED_CODECS.contains(&self.codec.as_str()) {
            return Err(FacePcaError::InvalidConfig(format!(
                "unsupported codec {:?}, expected one of {:?}",
                self.codec, SUPPORTED_CODECS
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(FacePcaError::InvalidConfig(format!(
                "jpeg quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}
