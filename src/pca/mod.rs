use std::sync::Arc;

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::config::DegeneratePolicy;
use crate::dense::{FeatureStatistics, Standardize};
use crate::error::{FacePcaError, Result};
use crate::svd::{decompose, default_svd, Decomposition, SVDImplementation};

mod projection;
pub use projection::{inverse_project, leading_components, project, project_sample};

pub struct PCABuilder<S: SVDImplementation + ?Sized> {
    full_matrices: bool,
    degenerate_policy: DegeneratePolicy,
    svd_implementation: Arc<S>,
}

impl<S: SVDImplementation> PCABuilder<S> {
    pub fn new(svd_implementation: S) -> Self {
        Self::from_arc(Arc::new(svd_implementation))
    }
}

impl PCABuilder<dyn SVDImplementation> {
    /// Builder using [`default_svd`].
    pub fn with_default_svd() -> Self {
        Self::from_arc(Arc::from(default_svd()))
    }
}

impl<S: SVDImplementation + ?Sized> PCABuilder<S> {
    pub fn from_arc(svd_implementation: Arc<S>) -> Self {
        PCABuilder {
            full_matrices: true,
            degenerate_policy: DegeneratePolicy::default(),
            svd_implementation,
        }
    }

    /// Keep the full `D × D` component basis (the default) instead of `min(N, D)` rows.
    pub fn full_matrices(mut self, full_matrices: bool) -> Self {
        self.full_matrices = full_matrices;
        self
    }

    pub fn degenerate_policy(mut self, policy: DegeneratePolicy) -> Self {
        self.degenerate_policy = policy;
        self
    }

    pub fn build(self) -> Pca<S> {
        Pca {
            full_matrices: self.full_matrices,
            degenerate_policy: self.degenerate_policy,
            svd_implementation: self.svd_implementation,
            statistics: None,
            decomposition: None,
            explained_variance_ratio: None,
            total_variance: None,
            eigenvalues: None,
        }
    }
}

/// PCA over standardized features: every column is centered and scaled to unit
/// variance before the SVD.
pub struct Pca<S: SVDImplementation + ?Sized> {
    full_matrices: bool,
    degenerate_policy: DegeneratePolicy,
    svd_implementation: Arc<S>,
    statistics: Option<FeatureStatistics>,
    decomposition: Option<Decomposition>,
    explained_variance_ratio: Option<Array1<f64>>,
    total_variance: Option<f64>,
    eigenvalues: Option<Array1<f64>>,
}

impl<S: SVDImplementation + ?Sized> Pca<S> {
    pub fn fit(&mut self, x: ArrayView2<f64>) -> Result<()> {
        let (n_samples, n_features) = x.dim();
        info!(
            "Fitting PCA on {} samples x {} features",
            n_samples, n_features
        );

        let (standardized, statistics) = x.standardize(self.degenerate_policy)?;

        let decomposition = decompose(
            self.svd_implementation.as_ref(),
            standardized.view(),
            self.full_matrices,
        )?;

        let eigenvalues = decomposition
            .s()
            .mapv(|x| x * x / (n_samples as f64 - 1.0));
        let total_variance = eigenvalues.sum();
        let explained_variance_ratio = &eigenvalues / total_variance;

        debug!(
            "SVD produced {} singular values and {} components",
            decomposition.s().len(),
            decomposition.n_components()
        );
        if let Some(first) = explained_variance_ratio.first() {
            info!("First component explains {:.2}% of variance", first * 100.0);
        }

        self.statistics = Some(statistics);
        self.decomposition = Some(decomposition);
        self.explained_variance_ratio = Some(explained_variance_ratio);
        self.total_variance = Some(total_variance);
        self.eigenvalues = Some(eigenvalues);

        Ok(())
    }

    /// Projects standardized `x` onto the first `k` components.
    pub fn transform(&self, x: ArrayView2<f64>, k: usize) -> Result<Array2<f64>> {
        let statistics = self.fitted_statistics()?;
        let decomposition = self.fitted_decomposition()?;

        let standardized = statistics.standardize(x)?;
        project(standardized.view(), decomposition.vt().view(), k)
    }

    pub fn fit_transform(&mut self, x: ArrayView2<f64>, k: usize) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x, k)
    }

    /// Subtracts the raw feature mean from `sample`, without scaling.
    pub fn center(&self, sample: ArrayView1<f64>) -> Result<Array1<f64>> {
        self.fitted_statistics()?.center(sample)
    }

    fn fitted_statistics(&self) -> Result<&FeatureStatistics> {
        self.statistics.as_ref().ok_or(FacePcaError::NotFitted)
    }

    fn fitted_decomposition(&self) -> Result<&Decomposition> {
        self.decomposition.as_ref().ok_or(FacePcaError::NotFitted)
    }

    pub fn components(&self) -> Option<&Array2<f64>> {
        self.decomposition.as_ref().map(|d| d.vt())
    }

    pub fn singular_values(&self) -> Option<&Array1<f64>> {
        self.decomposition.as_ref().map(|d| d.s())
    }

    /// Raw per-feature mean of the fitted data.
    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.statistics.as_ref().map(|s| s.mean())
    }

    pub fn explained_variance_ratio(&self) -> Option<&Array1<f64>> {
        self.explained_variance_ratio.as_ref()
    }

    pub fn cumulative_explained_variance_ratio(&self) -> Option<Array1<f64>> {
        self.explained_variance_ratio.as_ref().map(|ratios| {
            let mut sum = 0.0;
            ratios.mapv(|r| {
                sum += r;
                sum
            })
        })
    }

    pub fn total_variance(&self) -> Option<f64> {
        self.total_variance
    }

    pub fn eigenvalues(&self) -> Option<&Array1<f64>> {
        self.eigenvalues.as_ref()
    }
}
