use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use facepca::svd::{NalgebraSVD, SVDImplementation};
use facepca::{DegeneratePolicy, Pipeline, ReconstructionConfig, TargetSelection};
use image::imageops::FilterType;
use log::info;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Backend {
    Faer,
    Nalgebra,
    Lapack,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Filter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<Filter> for FilterType {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => FilterType::Nearest,
            Filter::Triangle => FilterType::Triangle,
            Filter::CatmullRom => FilterType::CatmullRom,
            Filter::Gaussian => FilterType::Gaussian,
            Filter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Eigenface PCA over a directory of images, with a video of one face being
/// rebuilt from more and more components.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory holding the face images
    #[arg(short, long, default_value = "yalefaces")]
    input_dir: PathBuf,

    /// Output video path
    #[arg(short, long, default_value = "reconstruction.avi")]
    output: PathBuf,

    /// Width every image is resized to
    #[arg(long, default_value_t = 40)]
    width: u32,

    /// Height every image is resized to
    #[arg(long, default_value_t = 40)]
    height: u32,

    #[arg(long, value_enum, default_value_t = Filter::CatmullRom)]
    filter: Filter,

    /// Components used for the projection scatter
    #[arg(long, default_value_t = 2)]
    viz_components: usize,

    /// Save the projection scatter as a PNG
    #[arg(long)]
    scatter: Option<PathBuf>,

    /// Four character codec code
    #[arg(long, default_value = "MJPG")]
    codec: String,

    #[arg(long, default_value_t = 200.0)]
    fps: f64,

    #[arg(long, default_value_t = 90)]
    jpeg_quality: u8,

    /// Reconstruct the sample at this index (sorted by file name)
    #[arg(long, conflicts_with_all = ["seed", "target_path"])]
    target_index: Option<usize>,

    /// Pick the target with this seed
    #[arg(long, conflicts_with = "target_path")]
    seed: Option<u64>,

    /// Reconstruct an image outside the input directory
    #[arg(long)]
    target_path: Option<PathBuf>,

    /// Abort when a pixel is constant across all images
    #[arg(long)]
    strict_features: bool,

    /// Skip files that cannot be decoded instead of aborting
    #[arg(long)]
    skip_undecodable: bool,

    /// Only keep min(samples, pixels) components
    #[arg(long)]
    thin: bool,

    #[arg(long, value_enum, default_value_t = Backend::Faer)]
    backend: Backend,
}

impl Args {
    fn target(&self) -> TargetSelection {
        if let Some(index) = self.target_index {
            TargetSelection::Index(index)
        } else if let Some(path) = &self.target_path {
            TargetSelection::Path(path.clone())
        } else if let Some(seed) = self.seed {
            TargetSelection::Seeded(seed)
        } else {
            TargetSelection::default()
        }
    }

    fn config(&self) -> ReconstructionConfig {
        let mut config = ReconstructionConfig::new()
            .input_dir(&self.input_dir)
            .output_path(&self.output)
            .resize_dims(self.width, self.height)
            .resize_filter(self.filter.into())
            .viz_components(self.viz_components)
            .codec(&self.codec)
            .fps(self.fps)
            .jpeg_quality(self.jpeg_quality)
            .target(self.target())
            .skip_undecodable(self.skip_undecodable)
            .full_matrices(!self.thin);
        if self.strict_features {
            config = config.degenerate_policy(DegeneratePolicy::Error);
        }
        if let Some(scatter) = &self.scatter {
            config = config.scatter_path(scatter);
        }
        config
    }

    fn backend(&self) -> anyhow::Result<Arc<dyn SVDImplementation>> {
        match self.backend {
            #[cfg(feature = "faer")]
            Backend::Faer => Ok(Arc::new(facepca::svd::FaerSVD)),
            #[cfg(not(feature = "faer"))]
            Backend::Faer => anyhow::bail!("built without the `faer` feature"),
            Backend::Nalgebra => Ok(Arc::new(NalgebraSVD)),
            #[cfg(feature = "lapack")]
            Backend::Lapack => Ok(Arc::new(facepca::svd::LapackSVD)),
            #[cfg(not(feature = "lapack"))]
            Backend::Lapack => anyhow::bail!("built without the `lapack` feature"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let pipeline = Pipeline::new(args.config())
        .context("invalid configuration")?
        .with_svd(args.backend()?);

    let summary = pipeline.run().with_context(|| {
        format!(
            "reconstruction from {} failed",
            args.input_dir.display()
        )
    })?;

    info!(
        "{} samples x {} features, {} frames written to {}",
        summary.n_samples,
        summary.n_features,
        summary.frame_count,
        summary.output_path.display()
    );
    if let Some(first) = summary.explained_variance_ratio.first() {
        info!("Leading component explains {:.2}% of variance", first * 100.0);
    }
    info!("Reconstructed target {}", summary.target.display());
    Ok(())
}
