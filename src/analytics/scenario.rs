//! Monte Carlo projection of terminal prices from a fitted return model.
//!
//! Each scenario sums `horizon_steps` i.i.d. Gaussian log-returns (a discrete
//! GBM approximation). The generator is seeded per call, so results depend only
//! on the model, the configuration and the seed.

use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use super::constants::{MEDIAN_PERCENTILE, UPSIDE_PERCENTILE, VAR_PERCENTILE};
use super::error::{EngineError, Result};
use super::returns::estimate_return_model;
use super::types::{
    DriftMode, PredictionSummary, PriceSeries, ReturnModel, ScenarioBatch, SimulationConfig,
};

/// Holds an optional fitted model so callers can fit once and simulate several times.
#[derive(Debug, Clone, Default)]
pub struct ScenarioSimulator {
    config: SimulationConfig,
    model: Option<ReturnModel>,
}

impl ScenarioSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config, model: None }
    }

    pub fn with_model(mut self, model: ReturnModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Fit the return model from a price series, replacing any previous one
    pub fn fit(&mut self, series: &PriceSeries) -> Result<&ReturnModel> {
        let model = self.model.insert(estimate_return_model(series)?);
        Ok(&*model)
    }

    pub fn model(&self) -> Option<&ReturnModel> {
        self.model.as_ref()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn simulate(&self) -> Result<PredictionSummary> {
        self.simulate_batch()?.summarize()
    }

    pub fn simulate_batch(&self) -> Result<ScenarioBatch> {
        self.config.validate()?;
        let model = self.model.as_ref().ok_or(EngineError::NotFitted)?;
        simulate_batch(model, &self.config)
    }
}

/// Simulate and reduce to percentile statistics
pub fn simulate(model: &ReturnModel, config: &SimulationConfig) -> Result<PredictionSummary> {
    simulate_batch(model, config)?.summarize()
}

/// Simulate terminal outcomes and hand the raw arrays to the caller
pub fn simulate_batch(model: &ReturnModel, config: &SimulationConfig) -> Result<ScenarioBatch> {
    config.validate()?;
    let step = step_distribution(model, config.drift_mode)?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut terminal_log_returns = Vec::with_capacity(config.num_scenarios);
    let mut terminal_prices = Vec::with_capacity(config.num_scenarios);

    for _ in 0..config.num_scenarios {
        let cumulative: f64 = (0..config.horizon_steps).map(|_| step.sample(&mut rng)).sum();
        terminal_log_returns.push(cumulative);
        terminal_prices.push(model.last_price() * cumulative.exp());
    }

    debug!(
        num_scenarios = config.num_scenarios,
        horizon_steps = config.horizon_steps,
        seed = config.seed,
        drift_mode = config.drift_mode.as_str(),
        "Scenario batch simulated"
    );

    Ok(ScenarioBatch { last_price: model.last_price(), terminal_log_returns, terminal_prices })
}

/// Full price paths, shape `horizon_steps x num_scenarios`, for charting.
///
/// Draws from the generator in the same order as [`simulate_batch`], so the last
/// row matches the batch's terminal prices up to rounding.
pub fn simulate_paths(model: &ReturnModel, config: &SimulationConfig) -> Result<Array2<f64>> {
    config.validate()?;
    let step = step_distribution(model, config.drift_mode)?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut paths = Array2::zeros((config.horizon_steps, config.num_scenarios));
    for mut path in paths.columns_mut() {
        let mut price = model.last_price();
        for cell in path.iter_mut() {
            price *= step.sample(&mut rng).exp();
            *cell = price;
        }
    }

    if paths.iter().any(|p| !p.is_finite()) {
        return Err(EngineError::numerical_instability("simulated price paths"));
    }
    Ok(paths)
}

fn step_distribution(model: &ReturnModel, drift_mode: DriftMode) -> Result<Normal<f64>> {
    let sigma = model.dispersion_per_step();
    let mean = match drift_mode {
        DriftMode::Raw => model.drift_per_step(),
        DriftMode::ItoCorrected => model.drift_per_step() - 0.5 * sigma * sigma,
    };
    Normal::new(mean, sigma)
        .map_err(|e| EngineError::invalid_input(format!("step distribution: {}", e)))
}

impl ScenarioBatch {
    pub fn num_scenarios(&self) -> usize {
        self.terminal_log_returns.len()
    }

    /// Reduce to mean, P50, P90, P5 (VaR) and the median simulated terminal price
    pub fn summarize(&self) -> Result<PredictionSummary> {
        let returns = self.sorted_returns()?;
        let mut prices = self.terminal_prices.clone();
        if prices.len() != returns.len() {
            return Err(EngineError::invalid_input(format!(
                "{} terminal prices for {} terminal returns",
                prices.len(),
                returns.len()
            )));
        }
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(EngineError::numerical_instability("terminal prices"));
        }
        prices.sort_by(f64::total_cmp);

        let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
        let at = |values: &[f64], pct: f64| {
            percentile(values, pct).ok_or_else(|| EngineError::invalid_input("empty scenario batch"))
        };

        Ok(PredictionSummary {
            mean_return,
            median_return: at(&returns, MEDIAN_PERCENTILE)?,
            upside_return: at(&returns, UPSIDE_PERCENTILE)?,
            value_at_risk_95: at(&returns, VAR_PERCENTILE)?,
            median_terminal_price: at(&prices, MEDIAN_PERCENTILE)?,
        })
    }

    /// Share of scenarios ending below the starting price
    pub fn probability_of_loss(&self) -> Option<f64> {
        if self.terminal_prices.is_empty() {
            return None;
        }
        let losses = self.terminal_prices.iter().filter(|&&p| p < self.last_price).count();
        Some(losses as f64 / self.terminal_prices.len() as f64)
    }

    /// Mean log-return of the scenarios at or below the 5th percentile
    pub fn expected_shortfall_95(&self) -> Option<f64> {
        let returns = self.sorted_returns().ok()?;
        let threshold = percentile(&returns, VAR_PERCENTILE)?;
        // The threshold never falls below the smallest sample, so the tail is non-empty
        let tail: Vec<f64> = returns.iter().copied().take_while(|r| *r <= threshold).collect();
        Some(tail.iter().sum::<f64>() / tail.len() as f64)
    }

    fn sorted_returns(&self) -> Result<Vec<f64>> {
        if self.terminal_log_returns.is_empty() {
            return Err(EngineError::invalid_input("empty scenario batch"));
        }
        if self.terminal_log_returns.iter().any(|r| !r.is_finite()) {
            return Err(EngineError::numerical_instability("terminal log-returns"));
        }
        let mut returns = self.terminal_log_returns.clone();
        returns.sort_by(f64::total_cmp);
        Ok(returns)
    }
}

/// Linear interpolation between order statistics of an ascending slice, `None` when empty
fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (pct / 100.0).clamp(0.0, 1.0) * last as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}
