use tracing::debug;

use super::constants::MIN_PRICE_OBSERVATIONS;
use super::error::{EngineError, Result};
use super::returns::log_returns;
use super::types::{PriceSeries, RecursionOrder, VolatilityConfig, VolatilityEstimate};

/// EWMA volatility scaled to `horizon_steps` and inflated by `boost`
pub fn forecast_volatility(series: &PriceSeries, config: &VolatilityConfig) -> Result<VolatilityEstimate> {
    config.validate()?;
    let returns = log_returns(series.prices())?;
    if returns.is_empty() {
        return Err(EngineError::insufficient_history(MIN_PRICE_OBSERVATIONS, series.len()));
    }

    let variance = ewma_variance(&returns, config.decay, config.order);
    let per_step = variance.sqrt();
    let value = per_step * config.boost * (config.horizon_steps as f64).sqrt();

    if !value.is_finite() {
        return Err(EngineError::numerical_instability("volatility forecast"));
    }

    debug!(
        observations = returns.len(),
        decay = config.decay,
        order = config.order.as_str(),
        per_step,
        value,
        "Volatility forecast computed"
    );

    Ok(VolatilityEstimate {
        per_step,
        horizon_steps: config.horizon_steps,
        boost: config.boost,
        value,
    })
}

/// Recursive `v = decay * v + (1 - decay) * r^2`, starting from zero
fn ewma_variance(returns: &[f64], decay: f64, order: RecursionOrder) -> f64 {
    let step = |variance: f64, r: &f64| decay * variance + (1.0 - decay) * r * r;
    match order {
        RecursionOrder::NewestFirst => returns.iter().rev().fold(0.0, step),
        RecursionOrder::OldestFirst => returns.iter().fold(0.0, step),
    }
}
