//! Dense linear algebra on `nalgebra`
//!
//! Weighted least squares through the SVD, sequential column screening
//! for aliased parameters and guarded inverses.

use nalgebra::{DMatrix, DVector};

use crate::error::{ModelError, Result};

/// Relative singular-value cutoff
const SVD_TOLERANCE: f64 = 1e-10;

/// Squared-norm ratio below which a column counts as aliased
const ALIAS_TOLERANCE: f64 = 1e-10;

/// Outcome of a weighted least-squares solve
#[derive(Debug, Clone)]
pub struct WeightedFit {
    pub beta: DVector<f64>,
    /// Weighted residual sum of squares
    pub rss: f64,
    pub rank: usize,
}

/// Minimise `Σ wᵢ (yᵢ − xᵢβ)²` via the SVD of `W^½X`; rank-deficient
/// designs get the minimum-norm solution.
pub fn weighted_fit(x: &DMatrix<f64>, y: &DVector<f64>, w: &DVector<f64>) -> Result<WeightedFit> {
    let sw = w.map(|v| v.max(0.0).sqrt());
    let ys = y.component_mul(&sw);

    if x.ncols() == 0 {
        return Ok(WeightedFit {
            beta: DVector::zeros(0),
            rss: ys.norm_squared(),
            rank: 0,
        });
    }

    let mut xs = x.clone();
    for (i, mut row) in xs.row_iter_mut().enumerate() {
        row *= sw[i];
    }

    let svd = xs.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    let eps = SVD_TOLERANCE * max_sv.max(f64::MIN_POSITIVE) * (x.nrows().max(x.ncols()) as f64);
    let rank = svd.rank(eps);
    let beta = svd
        .solve(&ys, eps)
        .map_err(|e| ModelError::numerical(format!("SVD least squares failed: {}", e), "weighted_fit"))?;

    let residual = &ys - &xs * &beta;
    Ok(WeightedFit {
        beta,
        rss: residual.norm_squared(),
        rank,
    })
}

/// Keep-mask of columns that are linearly independent of the columns
/// before them, under the weighted inner product.
pub fn independent_columns(x: &DMatrix<f64>, w: &DVector<f64>) -> Vec<bool> {
    let sw = w.map(|v| v.max(0.0).sqrt());
    let mut basis: Vec<DVector<f64>> = Vec::new();
    let mut keep = Vec::with_capacity(x.ncols());

    for column in x.column_iter() {
        let mut v = column.component_mul(&sw);
        let original = v.norm_squared();
        for q in &basis {
            let proj = q.dot(&v);
            v.axpy(-proj, q, 1.0);
        }
        let remaining = v.norm_squared();
        if original > 0.0 && remaining > ALIAS_TOLERANCE * original {
            basis.push(v / remaining.sqrt());
            keep.push(true);
        } else {
            keep.push(false);
        }
    }
    keep
}

/// Columns at the given indices
pub fn select_columns(x: &DMatrix<f64>, cols: &[usize]) -> DMatrix<f64> {
    x.select_columns(cols.iter())
}

/// `X'WX`
pub fn cross_product(x: &DMatrix<f64>, w: &DVector<f64>) -> DMatrix<f64> {
    let mut xw = x.clone();
    for (i, mut row) in xw.row_iter_mut().enumerate() {
        row *= w[i];
    }
    x.transpose() * xw
}

/// Inverse of a symmetric positive definite matrix
pub fn spd_inverse(m: &DMatrix<f64>, operation: &str) -> Result<DMatrix<f64>> {
    if m.nrows() == 0 {
        return Ok(DMatrix::zeros(0, 0));
    }
    if let Some(chol) = m.clone().cholesky() {
        return Ok(chol.inverse());
    }
    m.clone()
        .try_inverse()
        .ok_or_else(|| ModelError::numerical("matrix is singular", operation))
}

/// Moore–Penrose pseudo-inverse
pub fn pseudo_inverse(m: &DMatrix<f64>, operation: &str) -> Result<DMatrix<f64>> {
    if m.nrows() == 0 || m.ncols() == 0 {
        return Ok(DMatrix::zeros(m.ncols(), m.nrows()));
    }
    let svd = m.clone().svd(true, true);
    let eps = SVD_TOLERANCE * svd.singular_values.max().max(f64::MIN_POSITIVE);
    svd.pseudo_inverse(eps)
        .map_err(|e| ModelError::numerical(e.to_string(), operation))
}

/// Rank of `m` under the default tolerance
pub fn rank(m: &DMatrix<f64>) -> usize {
    if m.nrows() == 0 || m.ncols() == 0 {
        return 0;
    }
    let svd = m.clone().svd(false, false);
    let eps = SVD_TOLERANCE * svd.singular_values.max().max(f64::MIN_POSITIVE);
    svd.rank(eps)
}
