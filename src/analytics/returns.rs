use ndarray::Array1;
use tracing::debug;

use super::constants::{DISPERSION_FLOOR, MIN_PRICE_OBSERVATIONS};
use super::error::{EngineError, Result};
use super::types::{PriceSeries, ReturnModel};

/// Fit per-step log-return drift and dispersion from a price series
pub fn estimate_return_model(series: &PriceSeries) -> Result<ReturnModel> {
    let prices = usable_prices(series.prices())?;
    let returns = Array1::from_vec(log_returns(prices)?);

    let drift = returns
        .mean()
        .ok_or_else(|| EngineError::insufficient_history(MIN_PRICE_OBSERVATIONS, prices.len()))?;
    // Sample standard deviation is undefined for a single return, treat it as zero
    let sample_std = if returns.len() > 1 { returns.std(1.0) } else { 0.0 };
    let dispersion = sample_std + DISPERSION_FLOOR;
    let last_price = prices[prices.len() - 1];

    debug!(
        observations = prices.len(),
        drift,
        dispersion,
        last_price,
        "Return model estimated"
    );

    ReturnModel::new(drift, dispersion, last_price)
}

/// Per-step log-returns `ln(p[t] / p[t-1])`, after dropping leading missing values
pub fn log_returns(prices: &[f64]) -> Result<Vec<f64>> {
    let prices = usable_prices(prices)?;
    Ok(prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect())
}

/// Per-step simple returns `p[t] / p[t-1] - 1`, after dropping leading missing values
pub fn simple_returns(prices: &[f64]) -> Result<Vec<f64>> {
    let prices = usable_prices(prices)?;
    Ok(prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect())
}

/// Strip leading missing values and check what remains is a positive, finite series
fn usable_prices(prices: &[f64]) -> Result<&[f64]> {
    let start = prices.iter().position(|p| !p.is_nan()).unwrap_or(prices.len());
    let usable = &prices[start..];

    if usable.len() < MIN_PRICE_OBSERVATIONS {
        return Err(EngineError::insufficient_history(MIN_PRICE_OBSERVATIONS, usable.len()));
    }
    if let Some(bad) = usable.iter().find(|p| !p.is_finite()) {
        return Err(EngineError::invalid_input(format!("non-finite price {}", bad)));
    }
    if let Some(bad) = usable.iter().find(|p| **p <= 0.0) {
        return Err(EngineError::invalid_input(format!("non-positive price {}", bad)));
    }
    Ok(usable)
}
