//! Weighted ridge regression with intercept.
//!
//! Inputs are centered on their weighted means, rows are scaled by the square
//! root of their weights, and the regularized normal equations
//! `(XᵀX + αI) w = Xᵀy` are solved with nalgebra's Cholesky factorization.
//! The intercept is recovered from the means.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{ExplainError, Result};

/// A fitted linear model.
#[derive(Debug, Clone, PartialEq)]
pub struct RidgeFit {
    /// One coefficient per feature.
    pub coefficients: Array1<f64>,
    /// Intercept.
    pub intercept: f64,
}

impl RidgeFit {
    /// Prediction for one feature row.
    pub fn predict(&self, row: ArrayView1<f64>) -> f64 {
        self.intercept + row.dot(&self.coefficients)
    }

    /// Weighted coefficient of determination on `(x, y)`.
    ///
    /// Returns `1` for a perfect fit of constant targets and `0` for an
    /// imperfect one.
    pub fn score(&self, x: ArrayView2<f64>, y: ArrayView1<f64>, weights: ArrayView1<f64>) -> f64 {
        let total: f64 = weights.sum();
        if total <= 0.0 {
            return 0.0;
        }
        let mean = y.dot(&weights) / total;
        let mut residual = 0.0;
        let mut spread = 0.0;
        for ((row, &target), &weight) in x.axis_iter(Axis(0)).zip(y).zip(weights) {
            let err = target - self.predict(row);
            residual += weight * err * err;
            spread += weight * (target - mean) * (target - mean);
        }
        if spread == 0.0 {
            return if residual == 0.0 { 1.0 } else { 0.0 };
        }
        1.0 - residual / spread
    }
}

/// Fit `y ≈ x·w + b` minimizing `Σ wᵢ (yᵢ - ŷᵢ)² + α‖w‖²`.
///
/// # Errors
///
/// Returns [`ExplainError::Solver`] for mismatched lengths, non-positive total
/// weight, or a system that is not positive definite.
pub fn fit_weighted_ridge(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    alpha: f64,
) -> Result<RidgeFit> {
    let (n, p) = x.dim();
    if n == 0 || y.len() != n || weights.len() != n {
        return Err(ExplainError::Solver(format!(
            "{n} rows, {} targets, {} weights",
            y.len(),
            weights.len()
        )));
    }
    let total: f64 = weights.sum();
    if !(total > 0.0 && total.is_finite()) {
        return Err(ExplainError::Solver(format!("total sample weight {total}")));
    }

    let x_mean = x.t().dot(&weights) / total;
    let y_mean = y.dot(&weights) / total;

    let sqrt_w = weights.mapv(f64::sqrt);
    let xs: Array2<f64> = (&x - &x_mean) * &sqrt_w.view().insert_axis(Axis(1));
    let ys: Array1<f64> = (&y - y_mean) * &sqrt_w;

    let mut gram = xs.t().dot(&xs);
    for i in 0..p {
        gram[[i, i]] += alpha;
    }
    let rhs = xs.t().dot(&ys);
    let coefficients = cholesky_solve(&gram, &rhs)?;
    let intercept = y_mean - x_mean.dot(&coefficients);

    Ok(RidgeFit {
        coefficients,
        intercept,
    })
}

/// Solve `A x = b` for symmetric positive definite `A`.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    let a = DMatrix::from_row_iterator(n, n, a.iter().copied());
    let b = DVector::from_iterator(n, b.iter().copied());
    let solution = a
        .cholesky()
        .ok_or_else(|| ExplainError::Solver("system is not positive definite".into()))?
        .solve(&b);
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(ExplainError::Solver("solution is not finite".into()));
    }
    Ok(solution.iter().copied().collect())
}
