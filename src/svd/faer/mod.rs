use faer::{ColRef, MatRef};
use faer_ext::*;
use ndarray::{Array1, ArrayView2};

use super::{Decomposition, SVDImplementation};
use crate::error::Result;

/// Dense SVD from `faer`. Produces the full `D × D` right basis natively.
pub struct FaerSVD;

impl SVDImplementation for FaerSVD {
    fn compute(&self, matrix: ArrayView2<f64>, full_matrices: bool) -> Result<Decomposition> {
        let faer_mat = matrix.into_faer();
        if full_matrices {
            let svd = faer_mat.svd();
            to_decomposition(svd.u(), svd.s_diagonal(), svd.v())
        } else {
            let svd = faer_mat.thin_svd();
            to_decomposition(svd.u(), svd.s_diagonal(), svd.v())
        }
    }

    fn name(&self) -> &'static str {
        "faer"
    }
}

fn to_decomposition(
    u: MatRef<'_, f64>,
    s: ColRef<'_, f64>,
    v: MatRef<'_, f64>,
) -> Result<Decomposition> {
    let u = u.into_ndarray().to_owned();
    let s: Array1<f64> = Array1::from_iter(s.iter().cloned());
    let vt = v.into_ndarray().t().to_owned();

    Decomposition::new(u, s, vt)
}
