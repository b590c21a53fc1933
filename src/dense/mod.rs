use log::warn;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use crate::config::DegeneratePolicy;
use crate::error::{FacePcaError, Result};
use crate::loader::MIN_SAMPLES;

/// Column-wise mean and population standard deviation of a data matrix.
#[derive(Debug, Clone)]
pub struct FeatureStatistics {
    mean: Array1<f64>,
    std_dev: Array1<f64>,
}

impl FeatureStatistics {
    pub fn compute(x: ArrayView2<f64>) -> Result<Self> {
        let n_samples = x.nrows();
        if n_samples < MIN_SAMPLES {
            return Err(FacePcaError::InsufficientData {
                found: n_samples,
                required: MIN_SAMPLES,
            });
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| FacePcaError::InsufficientData {
                found: n_samples,
                required: MIN_SAMPLES,
            })?;
        let std_dev = x.std_axis(Axis(0), 0.0);

        Ok(FeatureStatistics { mean, std_dev })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn std_dev(&self) -> &Array1<f64> {
        &self.std_dev
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Indices of columns whose standard deviation is zero.
    pub fn degenerate_columns(&self) -> Vec<usize> {
        self.std_dev
            .iter()
            .enumerate()
            .filter(|(_, &s)| s == 0.0)
            .map(|(j, _)| j)
            .collect()
    }

    /// `(x - mean) / std_dev`, row by row. Zero-variance columns come out NaN/Inf.
    pub fn standardize(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.check_features(x.ncols())?;

        let mut standardized = x.to_owned();
        standardized
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(|mut row| {
                row -= &self.mean;
                row /= &self.std_dev;
            });

        Ok(standardized)
    }

    /// Subtracts the raw mean only; the standard deviation is not applied.
    pub fn center(&self, sample: ArrayView1<f64>) -> Result<Array1<f64>> {
        self.check_features(sample.len())?;
        Ok(&sample - &self.mean)
    }

    fn check_features(&self, found: usize) -> Result<()> {
        if found != self.n_features() {
            return Err(FacePcaError::DimensionMismatch {
                expected: self.n_features(),
                found,
            });
        }
        Ok(())
    }
}

/// Standardizes a data matrix column-wise without touching the input.
pub trait Standardize {
    fn standardize(&self, policy: DegeneratePolicy) -> Result<(Array2<f64>, FeatureStatistics)>;
}

impl Standardize for Array2<f64> {
    fn standardize(&self, policy: DegeneratePolicy) -> Result<(Array2<f64>, FeatureStatistics)> {
        standardize(self.view(), policy)
    }
}

impl Standardize for ArrayView2<'_, f64> {
    fn standardize(&self, policy: DegeneratePolicy) -> Result<(Array2<f64>, FeatureStatistics)> {
        standardize(self.view(), policy)
    }
}

fn standardize(
    x: ArrayView2<f64>,
    policy: DegeneratePolicy,
) -> Result<(Array2<f64>, FeatureStatistics)> {
    let stats = FeatureStatistics::compute(x)?;

    let degenerate = stats.degenerate_columns();
    if !degenerate.is_empty() {
        match policy {
            DegeneratePolicy::Warn => warn!(
                "{} zero-variance feature columns will standardize to NaN/Inf: {:?}",
                degenerate.len(),
                degenerate
            ),
            DegeneratePolicy::Error => {
                return Err(FacePcaError::DegenerateFeature {
                    columns: degenerate,
                })
            }
        }
    }

    let standardized = stats.standardize(x)?;
    Ok((standardized, stats))
}
