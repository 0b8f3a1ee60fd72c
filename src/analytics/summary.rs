use ndarray::Array1;

use super::error::Result;
use super::returns::simple_returns;
use super::types::{AssetRiskSummary, PriceSeries};

/// Mean simple return and its sample standard deviation, in percent rounded to 2 decimals
pub fn summarize_asset(series: &PriceSeries) -> Result<AssetRiskSummary> {
    let returns = Array1::from_vec(simple_returns(series.prices())?);
    let mean = returns.mean().unwrap_or(0.0);
    let volatility = if returns.len() > 1 { returns.std(1.0) } else { 0.0 };

    Ok(AssetRiskSummary {
        mean_return_pct: round_pct(mean),
        volatility_pct: round_pct(volatility),
        observations: returns.len(),
    })
}

fn round_pct(value: f64) -> f64 {
    (value * 100.0 * 100.0).round() / 100.0
}
