//! # Singular Value Decomposition
//!
//! Dense SVD backends behind [`SVDImplementation`]. Whatever the backend returns is
//! normalized by [`decompose`]: singular values sorted in descending order, the row
//! basis completed to `D × D` when full matrices are requested, and a deterministic
//! sign per component (largest-magnitude loading positive).

use log::debug;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};

use crate::error::{FacePcaError, Result};

#[cfg(feature = "faer")]
pub mod faer;
#[cfg(feature = "lapack")]
pub mod lapack;
pub mod nalgebra;

#[cfg(feature = "faer")]
pub use self::faer::FaerSVD;
#[cfg(feature = "lapack")]
pub use self::lapack::LapackSVD;
pub use self::nalgebra::NalgebraSVD;

/// Residual norm below which a candidate basis vector is treated as dependent.
const BASIS_TOLERANCE: f64 = 1e-8;

// Trait for SVD implementations
pub trait SVDImplementation: Send + Sync {
    /// Factorizes `matrix` (`N × D`). Backends that can produce the full `D × D`
    /// right basis should do so when `full_matrices` is set; others may return the
    /// thin factorization and let [`decompose`] complete it.
    fn compute(&self, matrix: ArrayView2<f64>, full_matrices: bool) -> Result<Decomposition>;

    fn name(&self) -> &'static str;
}

/// The backend used when none is chosen explicitly.
pub fn default_svd() -> Box<dyn SVDImplementation> {
    #[cfg(feature = "faer")]
    {
        Box::new(FaerSVD)
    }
    #[cfg(not(feature = "faer"))]
    {
        Box::new(NalgebraSVD)
    }
}

/// `U`, singular values and `Vt` of a data matrix.
#[derive(Debug, Clone)]
pub struct Decomposition {
    u: Array2<f64>,
    s: Array1<f64>,
    vt: Array2<f64>,
}

impl Decomposition {
    pub fn new(u: Array2<f64>, s: Array1<f64>, vt: Array2<f64>) -> Result<Self> {
        if u.ncols() < s.len() {
            return Err(FacePcaError::DimensionMismatch {
                expected: s.len(),
                found: u.ncols(),
            });
        }
        if vt.nrows() < s.len() {
            return Err(FacePcaError::DimensionMismatch {
                expected: s.len(),
                found: vt.nrows(),
            });
        }
        Ok(Decomposition { u, s, vt })
    }

    pub fn u(&self) -> &Array2<f64> {
        &self.u
    }

    pub fn s(&self) -> &Array1<f64> {
        &self.s
    }

    /// Components as rows, ordered by decreasing singular value.
    pub fn vt(&self) -> &Array2<f64> {
        &self.vt
    }

    /// Number of rows of `Vt`.
    pub fn n_components(&self) -> usize {
        self.vt.nrows()
    }

    // Reconstruct the original matrix
    pub fn reconstruct(&self) -> Array2<f64> {
        let r = self.s.len();
        let s_diag = Array2::from_diag(&self.s);
        self.u
            .slice(s![.., ..r])
            .dot(&s_diag)
            .dot(&self.vt.slice(s![..r, ..]))
    }

    fn sorted(mut self) -> Self {
        let mut order: Vec<usize> = (0..self.s.len()).collect();
        order.sort_by(|&a, &b| self.s[b].total_cmp(&self.s[a]));
        if order.iter().enumerate().all(|(i, &idx)| i == idx) {
            return self;
        }

        let u_temp = self.u.clone();
        let s_temp = self.s.clone();
        let vt_temp = self.vt.clone();
        for (i, &idx) in order.iter().enumerate() {
            self.s[i] = s_temp[idx];
            self.u.column_mut(i).assign(&u_temp.column(idx));
            self.vt.row_mut(i).assign(&vt_temp.row(idx));
        }
        self
    }

    fn thin(self) -> Self {
        let r = self.s.len();
        Decomposition {
            u: self.u.slice(s![.., ..r]).to_owned(),
            vt: self.vt.slice(s![..r, ..]).to_owned(),
            s: self.s,
        }
    }

    /// Extends the rows of `Vt` to an orthonormal basis of the whole feature space
    /// by Gram-Schmidt against the standard basis.
    fn completed(self) -> Result<Self> {
        let (r, d) = self.vt.dim();
        if r >= d {
            return Ok(self);
        }

        let mut rows: Vec<Array1<f64>> = self.vt.rows().into_iter().map(|v| v.to_owned()).collect();
        for j in 0..d {
            if rows.len() == d {
                break;
            }
            let mut candidate = Array1::zeros(d);
            candidate[j] = 1.0;
            // Two passes keep the completed rows orthogonal to working precision.
            for _ in 0..2 {
                for basis in &rows {
                    let proj = basis.dot(&candidate);
                    candidate.scaled_add(-proj, basis);
                }
            }
            let norm = candidate.dot(&candidate).sqrt();
            if norm > BASIS_TOLERANCE {
                candidate /= norm;
                rows.push(candidate);
            }
        }

        if rows.len() != d {
            return Err(FacePcaError::Decomposition(format!(
                "could only complete {} of {} basis rows",
                rows.len(),
                d
            )));
        }

        let mut vt = Array2::zeros((d, d));
        for (mut target, row) in vt.rows_mut().into_iter().zip(&rows) {
            target.assign(row);
        }
        Ok(Decomposition {
            u: self.u,
            s: self.s,
            vt,
        })
    }

    /// Makes the largest-magnitude entry of every `Vt` row positive, flipping the
    /// matching column of `U` along with it.
    fn sign_flipped(mut self) -> Self {
        let n_paired = self.u.ncols().min(self.vt.nrows());
        for (i, mut row) in self.vt.axis_iter_mut(Axis(0)).enumerate() {
            let pivot = row
                .iter()
                .copied()
                .fold(0.0f64, |best, v| if v.abs() > best.abs() { v } else { best });
            if pivot < 0.0 {
                row.mapv_inplace(|v| -v);
                if i < n_paired {
                    self.u.column_mut(i).mapv_inplace(|v| -v);
                }
            }
        }
        self
    }
}

/// Runs `svd` on `matrix` and normalizes the result.
pub fn decompose<S>(svd: &S, matrix: ArrayView2<f64>, full_matrices: bool) -> Result<Decomposition>
where
    S: SVDImplementation + ?Sized,
{
    let (n_samples, n_features) = matrix.dim();
    if n_samples == 0 || n_features == 0 {
        return Err(FacePcaError::InsufficientData {
            found: n_samples,
            required: 1,
        });
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(FacePcaError::Decomposition(
            "input matrix contains NaN or infinite values".to_string(),
        ));
    }

    debug!(
        "Computing {} SVD with {} on {} x {} matrix",
        if full_matrices { "full" } else { "thin" },
        svd.name(),
        n_samples,
        n_features
    );

    let decomposition = svd.compute(matrix, full_matrices)?;
    if decomposition.u.nrows() != n_samples {
        return Err(FacePcaError::DimensionMismatch {
            expected: n_samples,
            found: decomposition.u.nrows(),
        });
    }
    if decomposition.vt.ncols() != n_features {
        return Err(FacePcaError::DimensionMismatch {
            expected: n_features,
            found: decomposition.vt.ncols(),
        });
    }

    let decomposition = decomposition.sorted();
    let decomposition = if full_matrices {
        decomposition.completed()?
    } else {
        decomposition.thin()
    };

    Ok(decomposition.sign_flipped())
}
