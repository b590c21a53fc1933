use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{FacePcaError, Result};

/// First `k` rows of `vt`, the `W_k` of a projection.
pub fn leading_components(vt: ArrayView2<'_, f64>, k: usize) -> Result<ArrayView2<'_, f64>> {
    let available = vt.nrows();
    if k == 0 || k > available {
        return Err(FacePcaError::InvalidComponentCount {
            requested: k,
            available,
        });
    }
    Ok(vt.slice_move(s![..k, ..]))
}

/// `x · W_kᵀ` for every row of `x`.
pub fn project(x: ArrayView2<f64>, vt: ArrayView2<f64>, k: usize) -> Result<Array2<f64>> {
    check_features(x.ncols(), vt.ncols())?;
    let w = leading_components(vt, k)?;
    Ok(x.dot(&w.t()))
}

/// `x · W_kᵀ` for a single sample.
pub fn project_sample(x: ArrayView1<f64>, vt: ArrayView2<f64>, k: usize) -> Result<Array1<f64>> {
    check_features(x.len(), vt.ncols())?;
    let w = leading_components(vt, k)?;
    Ok(w.dot(&x))
}

/// `coords · W_k`, mapping `k` coordinates back to feature space.
pub fn inverse_project(coords: ArrayView1<f64>, vt: ArrayView2<f64>) -> Result<Array1<f64>> {
    let w = leading_components(vt, coords.len())?;
    Ok(coords.dot(&w))
}

fn check_features(found: usize, expected: usize) -> Result<()> {
    if found != expected {
        return Err(FacePcaError::DimensionMismatch { expected, found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn basis() -> Array2<f64> {
        array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
    }

    #[test]
    fn test_project_matrix() {
        let x = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let z = project(x.view(), basis().view(), 2).unwrap();
        assert_eq!(z, array![[1.0, 2.0], [4.0, 5.0]]);
    }

    #[test]
    fn test_project_and_invert_sample() {
        let vt = basis();
        let x = array![1.0, 2.0, 3.0];
        let coords = project_sample(x.view(), vt.view(), 2).unwrap();
        assert_eq!(coords, array![1.0, 2.0]);
        let back = inverse_project(coords.view(), vt.view()).unwrap();
        assert_eq!(back, array![1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_component_count_bounds() {
        let vt = basis();
        let x = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            project(x.view(), vt.view(), 0),
            Err(FacePcaError::InvalidComponentCount { requested: 0, available: 3 })
        ));
        assert!(matches!(
            project(x.view(), vt.view(), 4),
            Err(FacePcaError::InvalidComponentCount { requested: 4, .. })
        ));
    }

    #[test]
    fn test_feature_mismatch() {
        let vt = basis();
        let x = array![[1.0, 2.0]];
        assert!(matches!(
            project(x.view(), vt.view(), 1),
            Err(FacePcaError::DimensionMismatch { expected: 3, found: 2 })
        ));
    }
}
