//! # Image loading
//!
//! Turns a directory of face images into an `N × D` data matrix. Each file is decoded
//! (format detected from content, since files like `subject01.happy` carry no
//! extension), converted to 8-bit luma, resized to the configured size and flattened
//! row-major.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{GrayImage, ImageReader};
use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use rayon::prelude::*;

use crate::config::ReconstructionConfig;
use crate::error::{FacePcaError, Result};

/// Filenames that are never image data.
pub const EXCLUDED_FILES: &[&str] = &[".DS_Store"];

/// Standardization needs at least two samples.
pub const MIN_SAMPLES: usize = 2;

/// Returns `true` for directory entries that must not be treated as samples.
pub fn is_excluded(file_name: &str) -> bool {
    EXCLUDED_FILES.contains(&file_name) || file_name.starts_with('.')
}

/// Lists the regular data files of `dir`, sorted by file name.
pub fn list_data_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| FacePcaError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FacePcaError::io(dir, e))?;
        let path = entry.path();
        // Follows symlinks, unlike `DirEntry::file_type`.
        let metadata = fs::metadata(&path).map_err(|e| FacePcaError::io(&path, e))?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name();
        match name.to_str() {
            Some(name) if is_excluded(name) => {
                debug!("Skipping non-data entry {}", name);
            }
            _ => files.push(path),
        }
    }

    files.sort();
    Ok(files)
}

/// Samples read from disk together with the file each row came from.
#[derive(Debug, Clone)]
pub struct SampleSet {
    paths: Vec<PathBuf>,
    matrix: Array2<f64>,
    dims: (u32, u32),
}

impl SampleSet {
    /// `N × D` matrix, one row per sample.
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.matrix.ncols()
    }

    /// `(width, height)` of every sample.
    pub fn dims(&self) -> (u32, u32) {
        self.dims
    }
}

pub struct ImageLoader {
    width: u32,
    height: u32,
    filter: FilterType,
    skip_undecodable: bool,
}

impl ImageLoader {
    pub fn new(width: u32, height: u32) -> Self {
        ImageLoader {
            width,
            height,
            filter: FilterType::CatmullRom,
            skip_undecodable: false,
        }
    }

    pub fn from_config(config: &ReconstructionConfig) -> Self {
        let (width, height) = config.get_resize_dims();
        ImageLoader::new(width, height)
            .filter(config.get_resize_filter())
            .skip_undecodable(config.get_skip_undecodable())
    }

    pub fn filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn skip_undecodable(mut self, skip: bool) -> Self {
        self.skip_undecodable = skip;
        self
    }

    pub fn feature_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Decodes one image file and resizes it to the loader's target size.
    pub fn load_image(&self, path: &Path) -> Result<GrayImage> {
        let reader = ImageReader::open(path)
            .map_err(|e| FacePcaError::io(path, e))?
            .with_guessed_format()
            .map_err(|e| FacePcaError::io(path, e))?;
        let decoded = reader.decode().map_err(|source| FacePcaError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

        let gray = decoded.into_luma8();
        Ok(image::imageops::resize(
            &gray,
            self.width,
            self.height,
            self.filter,
        ))
    }

    /// Decodes one image file into a flat sample of length `width * height`.
    pub fn load_sample(&self, path: &Path) -> Result<Array1<f64>> {
        let gray = self.load_image(path)?;
        let sample: Array1<f64> = gray.pixels().map(|p| f64::from(p.0[0])).collect();
        if sample.len() != self.feature_count() {
            return Err(FacePcaError::DimensionMismatch {
                expected: self.feature_count(),
                found: sample.len(),
            });
        }
        Ok(sample)
    }

    /// Loads every data file of `dir` into a [`SampleSet`].
    pub fn load_dir(&self, dir: &Path) -> Result<SampleSet> {
        let files = list_data_files(dir)?;
        info!("Loading {} image files from {}", files.len(), dir.display());

        let decoded: Vec<(PathBuf, Result<Array1<f64>>)> = files
            .into_par_iter()
            .map(|path| {
                let sample = self.load_sample(&path);
                (path, sample)
            })
            .collect();

        let mut paths = Vec::with_capacity(decoded.len());
        let mut samples = Vec::with_capacity(decoded.len());
        for (path, sample) in decoded {
            match sample {
                Ok(sample) => {
                    paths.push(path);
                    samples.push(sample);
                }
                Err(err @ FacePcaError::Decode { .. }) if self.skip_undecodable => {
                    warn!("Skipping undecodable file: {}", err);
                }
                Err(err) => return Err(err),
            }
        }

        let matrix = build_data_matrix(&samples, self.feature_count())?;
        debug!(
            "Built data matrix with {} samples x {} features",
            matrix.nrows(),
            matrix.ncols()
        );

        Ok(SampleSet {
            paths,
            matrix,
            dims: (self.width, self.height),
        })
    }
}

/// Stacks samples into an `N × D` matrix, one row per sample, in input order.
pub fn build_data_matrix(samples: &[Array1<f64>], n_features: usize) -> Result<Array2<f64>> {
    if samples.len() < MIN_SAMPLES {
        return Err(FacePcaError::InsufficientData {
            found: samples.len(),
            required: MIN_SAMPLES,
        });
    }

    let mut matrix = Array2::zeros((samples.len(), n_features));
    for (mut row, sample) in matrix.rows_mut().into_iter().zip(samples) {
        if sample.len() != n_features {
            return Err(FacePcaError::DimensionMismatch {
                expected: n_features,
                found: sample.len(),
            });
        }
        row.assign(sample);
    }

    Ok(matrix)
}
