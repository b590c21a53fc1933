use ndarray::{Array1, ArrayView2};
use nshare::{IntoNalgebra, IntoNdarray2};

use super::{Decomposition, SVDImplementation};
use crate::error::{FacePcaError, Result};

/// Dense SVD from `nalgebra`. Always thin; full matrices are completed by
/// [`decompose`](super::decompose).
pub struct NalgebraSVD;

impl SVDImplementation for NalgebraSVD {
    fn compute(&self, matrix: ArrayView2<f64>, _full_matrices: bool) -> Result<Decomposition> {
        let matrix = matrix.into_nalgebra().clone_owned();

        let svd = ::nalgebra::linalg::SVD::new(matrix, true, true);
        let u = svd
            .u
            .ok_or_else(|| FacePcaError::Decomposition("nalgebra did not return U".to_string()))?;
        let vt = svd
            .v_t
            .ok_or_else(|| FacePcaError::Decomposition("nalgebra did not return Vt".to_string()))?;
        let s = Array1::from(svd.singular_values.as_slice().to_vec());

        Decomposition::new(
            u.into_ndarray2().into_owned(),
            s,
            vt.into_ndarray2().into_owned(),
        )
    }

    fn name(&self) -> &'static str {
        "nalgebra"
    }
}
