use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building the eigenface basis or writing the reconstruction.
#[derive(Error, Debug)]
pub enum FacePcaError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("zero-variance feature columns {columns:?} cannot be standardized")]
    DegenerateFeature { columns: Vec<usize> },
    #[error("insufficient data: found {found} samples, at least {required} required")]
    InsufficientData { found: usize, required: usize },
    #[error("component count {requested} is outside 1..={available}")]
    InvalidComponentCount { requested: usize, available: usize },
    #[error("PCA has not been fitted yet")]
    NotFitted,
    #[error("SVD computation failed: {0}")]
    Decomposition(String),
    #[error("video encoding failed: {0}")]
    Encode(String),
    #[error("frame encoding failed: {0}")]
    EncodeImage(#[from] image::ImageError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, FacePcaError>;

impl FacePcaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FacePcaError::Io {
            path: path.into(),
            source,
        }
    }
}
