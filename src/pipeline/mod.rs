//! # End-to-end run
//!
//! load → standardize → SVD → two component projection (and optional scatter) →
//! progressive reconstruction of one target → MJPG video.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use ndarray::{s, Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::{ReconstructionConfig, TargetSelection};
use crate::error::{FacePcaError, Result};
use crate::loader::{ImageLoader, SampleSet};
use crate::pca::PCABuilder;
use crate::plot::ScatterPlot;
use crate::reconstruct::Reconstructor;
use crate::svd::{default_svd, SVDImplementation};
use crate::video::{encode_video, VideoSpec};

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub n_samples: usize,
    pub n_features: usize,
    pub singular_values: Array1<f64>,
    pub explained_variance_ratio: Array1<f64>,
    /// Standardized samples projected onto the visualization components.
    pub projection: Array2<f64>,
    pub target: PathBuf,
    pub frame_count: usize,
    /// Error of the last (fullest) reconstruction against the target.
    pub final_mse: f64,
    pub output_path: PathBuf,
    pub scatter_path: Option<PathBuf>,
}

pub struct Pipeline {
    config: ReconstructionConfig,
    svd: Arc<dyn SVDImplementation>,
}

impl Pipeline {
    pub fn new(config: ReconstructionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Pipeline {
            config,
            svd: Arc::from(default_svd()),
        })
    }

    pub fn with_svd(mut self, svd: Arc<dyn SVDImplementation>) -> Self {
        self.svd = svd;
        self
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    pub fn run(&self) -> Result<RunSummary> {
        let config = &self.config;
        let loader = ImageLoader::from_config(config);
        let samples = loader.load_dir(config.get_input_dir())?;
        info!(
            "Loaded {} samples of {} features",
            samples.n_samples(),
            samples.n_features()
        );

        let mut pca = PCABuilder::from_arc(Arc::clone(&self.svd))
            .full_matrices(config.get_full_matrices())
            .degenerate_policy(config.get_degenerate_policy())
            .build();
        pca.fit(samples.matrix().view())?;

        let projection = pca.transform(samples.matrix().view(), config.get_viz_components())?;
        debug!("Projection onto {} components:\n{:.4}", projection.ncols(), projection);

        let scatter_path = match config.get_scatter_path() {
            Some(path) if projection.ncols() >= 2 => {
                ScatterPlot::default().save(projection.slice(s![.., ..2]), path)?;
                Some(path.to_path_buf())
            }
            Some(path) => {
                warn!(
                    "Scatter {} needs two components, only {} projected",
                    path.display(),
                    projection.ncols()
                );
                None
            }
            None => None,
        };

        let (target, target_sample) = select_target(config.get_target(), &samples, &loader)?;
        info!("Reconstructing {}", target.display());

        let centered = pca.center(target_sample.view())?;
        let (mean, vt) = match (pca.mean(), pca.components()) {
            (Some(mean), Some(vt)) => (mean, vt),
            _ => return Err(FacePcaError::NotFitted),
        };
        let reconstructor =
            Reconstructor::new(centered.view(), vt.view(), mean.view(), samples.dims())?;

        let spec = VideoSpec::from_config(config)?;
        let mut final_mse = f64::NAN;
        let frames = reconstructor.frames().inspect(|frame| {
            trace!(
                "Frame {} mse {:.4}",
                frame.component_count(),
                frame.mse()
            );
            final_mse = frame.mse();
        });
        let frame_count = encode_video(config.get_output_path(), spec, frames)?;
        info!(
            "Reconstruction with all {} components has mse {:.6}",
            frame_count, final_mse
        );

        Ok(RunSummary {
            n_samples: samples.n_samples(),
            n_features: samples.n_features(),
            singular_values: pca.singular_values().cloned().unwrap_or_default(),
            explained_variance_ratio: pca.explained_variance_ratio().cloned().unwrap_or_default(),
            projection,
            target,
            frame_count,
            final_mse,
            output_path: config.get_output_path().to_path_buf(),
            scatter_path,
        })
    }
}

/// Resolves the target image: its source path and flattened pixels.
pub fn select_target(
    selection: &TargetSelection,
    samples: &SampleSet,
    loader: &ImageLoader,
) -> Result<(PathBuf, Array1<f64>)> {
    let from_pool = |index: usize| -> Result<(PathBuf, Array1<f64>)> {
        let available = samples.n_samples();
        if index >= available {
            return Err(FacePcaError::InvalidConfig(format!(
                "target index {} out of range for {} samples",
                index, available
            )));
        }
        Ok((
            samples.paths()[index].clone(),
            samples.matrix().row(index).to_owned(),
        ))
    };

    match selection {
        TargetSelection::Index(index) => from_pool(*index),
        TargetSelection::Seeded(seed) => {
            let mut rng = ChaCha8Rng::seed_from_u64(*seed);
            let index = rng.random_range(0..samples.n_samples());
            debug!("Seed {} selected sample {}", seed, index);
            from_pool(index)
        }
        TargetSelection::Path(path) => {
            let sample = loader.load_sample(path)?;
            if sample.len() != samples.n_features() {
                return Err(FacePcaError::DimensionMismatch {
                    expected: samples.n_features(),
                    found: sample.len(),
                });
            }
            Ok((path.clone(), sample))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svd::tests::assert_descending;
    use crate::svd::NalgebraSVD;
    use image::{GrayImage, Luma};
    use std::collections::HashSet;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_faces(dir: &Path, count: u32) {
        for i in 0..count {
            let img = GrayImage::from_fn(10, 10, |x, y| {
                let v = (x * 17 + y * 29 + i * 53 + x * y * i) % 251;
                Luma([v as u8])
            });
            img.save(dir.join(format!("subject{:02}.png", i))).unwrap();
        }
    }

    fn distinct_points(projection: &Array2<f64>) -> usize {
        projection
            .rows()
            .into_iter()
            .map(|p| (p[0].to_bits(), p[1].to_bits()))
            .collect::<HashSet<_>>()
            .len()
    }

    fn config(dir: &Path) -> ReconstructionConfig {
        ReconstructionConfig::new()
            .input_dir(dir)
            .resize_dims(10, 10)
            .output_path(dir.join("out").join("reconstruction.avi"))
            .target(TargetSelection::Index(2))
    }

    #[test]
    fn test_end_to_end() {
        let dir = tempdir().unwrap();
        write_faces(dir.path(), 4);
        fs::write(dir.path().join(".DS_Store"), b"junk").unwrap();
        fs::create_dir(dir.path().join("out")).unwrap();

        let config = config(dir.path()).scatter_path(dir.path().join("out").join("scatter.png"));
        let summary = Pipeline::new(config).unwrap().run().unwrap();

        assert_eq!(summary.n_samples, 4);
        assert_eq!(summary.n_features, 100);
        assert_eq!(summary.singular_values.len(), 4);
        assert_eq!(summary.frame_count, 100);
        assert_eq!(summary.projection.dim(), (4, 2));
        assert_eq!(distinct_points(&summary.projection), 4);
        assert_descending(&summary.singular_values);
        assert!(summary.final_mse < 1e-12);
        assert!(summary.output_path.exists());
        assert!(summary.scatter_path.unwrap().exists());
        assert!(summary.target.ends_with("subject02.png"));
    }

    #[test]
    fn test_thin_run_with_nalgebra() {
        let dir = tempdir().unwrap();
        write_faces(dir.path(), 4);
        fs::create_dir(dir.path().join("out")).unwrap();

        let config = config(dir.path()).full_matrices(false);
        let summary = Pipeline::new(config)
            .unwrap()
            .with_svd(Arc::new(NalgebraSVD))
            .run()
            .unwrap();
        assert_eq!(summary.frame_count, 4);
        assert_eq!(summary.singular_values.len(), 4);
        assert_descending(&summary.singular_values);
        assert_eq!(summary.projection.dim(), (4, 2));
        assert_eq!(distinct_points(&summary.projection), 4);
        // The thin basis does not span the raw-centered target.
        assert!(summary.final_mse.is_finite());
        assert!(summary.output_path.exists());
        assert!(summary.scatter_path.is_none());
    }

    #[test]
    fn test_seeded_target_is_reproducible() {
        let dir = tempdir().unwrap();
        write_faces(dir.path(), 5);
        let loader = ImageLoader::new(10, 10);
        let samples = loader.load_dir(dir.path()).unwrap();

        let (a, _) = select_target(&TargetSelection::Seeded(7), &samples, &loader).unwrap();
        let (b, _) = select_target(&TargetSelection::Seeded(7), &samples, &loader).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_target_index_out_of_range() {
        let dir = tempdir().unwrap();
        write_faces(dir.path(), 3);
        let loader = ImageLoader::new(10, 10);
        let samples = loader.load_dir(dir.path()).unwrap();

        assert!(matches!(
            select_target(&TargetSelection::Index(3), &samples, &loader),
            Err(FacePcaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_target_from_path() {
        let dir = tempdir().unwrap();
        let pool = dir.path().join("pool");
        fs::create_dir(&pool).unwrap();
        write_faces(&pool, 3);
        let outside = dir.path().join("outside.png");
        GrayImage::from_pixel(10, 10, Luma([9])).save(&outside).unwrap();

        let loader = ImageLoader::new(10, 10);
        let samples = loader.load_dir(&pool).unwrap();
        let (path, sample) =
            select_target(&TargetSelection::Path(outside.clone()), &samples, &loader).unwrap();
        assert_eq!(path, outside);
        assert!(sample.iter().all(|&v| v == 9.0));
    }

    #[test]
    fn test_empty_directory_fails_cleanly() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".DS_Store"), b"junk").unwrap();

        let err = Pipeline::new(config(dir.path())).unwrap().run().unwrap_err();
        assert!(matches!(err, FacePcaError::InsufficientData { found: 0, .. }));
        assert!(!dir.path().join("out").join("reconstruction.avi").exists());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ReconstructionConfig::new().codec("H264");
        assert!(matches!(
            Pipeline::new(config),
            Err(FacePcaError::InvalidConfig(_))
        ));
    }
}
