pub mod config;
pub mod dense;
pub mod error;
pub mod loader;
pub mod pca;
pub mod pipeline;
pub mod plot;
pub mod reconstruct;
pub mod svd;
pub mod video;

pub use config::{DegeneratePolicy, ReconstructionConfig, TargetSelection};
pub use error::{FacePcaError, Result};
pub use pipeline::{Pipeline, RunSummary};
