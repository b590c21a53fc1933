use ndarray::{Array1, ArrayView2};
use nshare::{IntoNalgebra, IntoNdarray2};

use super::{Decomposition, SVDImplementation};
use crate::error::{FacePcaError, Result};

/// LAPACK `gesvd` through `nalgebra-lapack`. Always returns full matrices;
/// [`decompose`](super::decompose) trims them when a thin result is wanted.
pub struct LapackSVD;

impl SVDImplementation for LapackSVD {
    fn compute(&self, matrix: ArrayView2<f64>, _full_matrices: bool) -> Result<Decomposition> {
        let matrix = matrix.into_nalgebra().clone_owned();

        let svd = nalgebra_lapack::SVD::new(matrix)
            .ok_or_else(|| FacePcaError::Decomposition("LAPACK SVD did not converge".to_string()))?;

        Decomposition::new(
            svd.u.into_ndarray2().into_owned(),
            Array1::from(svd.singular_values.as_slice().to_vec()),
            svd.vt.into_ndarray2().into_owned(),
        )
    }

    fn name(&self) -> &'static str {
        "lapack"
    }
}
