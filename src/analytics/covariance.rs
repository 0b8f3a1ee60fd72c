use ndarray::{Array1, Array2, Axis};
use ndarray_stats::CorrelationExt;

use super::constants::MIN_RETURN_PERIODS;
use super::error::{EngineError, Result};
use super::types::AssetReturnMatrix;

/// Sample mean vector and covariance matrix (divide by n-1) of the asset returns
pub fn estimate_moments(matrix: &AssetReturnMatrix) -> Result<(Array1<f64>, Array2<f64>)> {
    let returns = matrix.returns();

    if returns.nrows() < MIN_RETURN_PERIODS {
        return Err(EngineError::invalid_input(format!(
            "need at least {} return periods, got {}",
            MIN_RETURN_PERIODS,
            returns.nrows()
        )));
    }
    if returns.iter().any(|r| !r.is_finite()) {
        return Err(EngineError::invalid_input("return matrix contains non-finite values"));
    }

    let means = returns
        .mean_axis(Axis(0))
        .ok_or_else(|| EngineError::invalid_input("empty return matrix"))?;

    // `cov` treats rows as variables, so transpose to assets x periods
    let covariance = returns
        .t()
        .cov(1.0)
        .map_err(|_| EngineError::invalid_input("empty return matrix"))?;

    Ok((means, covariance))
}
