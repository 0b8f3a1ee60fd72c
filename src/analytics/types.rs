use std::collections::HashSet;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::Serialize;
use tracing::info;

use super::constants::{
    DEFAULT_EWMA_DECAY, DEFAULT_HORIZON_STEPS, DEFAULT_NUM_SCENARIOS, DEFAULT_PORTFOLIO_SEED,
    DEFAULT_RISK_AVERSION, DEFAULT_SEED, DEFAULT_VOL_BOOST, DEFAULT_VOL_HORIZON_STEPS,
};
use super::error::{EngineError, Result};
use super::returns::simple_returns;

/// Ordered price history for one instrument.
///
/// Missing observations are stored as `NaN`. Leading missing values are skipped
/// by the estimators; missing values after the first usable price are invalid.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriceSeries {
    timestamps: Vec<DateTime<Utc>>, // Empty for untimed series
    prices: Vec<f64>,
}

impl PriceSeries {
    pub fn new(prices: Vec<f64>) -> Self {
        Self { timestamps: Vec::new(), prices }
    }

    /// Build a timed series; timestamps must be strictly increasing and match the prices one-to-one.
    pub fn with_timestamps(timestamps: Vec<DateTime<Utc>>, prices: Vec<f64>) -> Result<Self> {
        if timestamps.len() != prices.len() {
            return Err(EngineError::invalid_input(format!(
                "{} timestamps for {} prices",
                timestamps.len(),
                prices.len()
            )));
        }
        if timestamps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::invalid_input("timestamps are not strictly increasing"));
        }
        Ok(Self { timestamps, prices })
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    pub fn timestamps(&self) -> Option<&[DateTime<Utc>]> {
        if self.timestamps.is_empty() { None } else { Some(&self.timestamps) }
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Most recent finite observation
    pub fn last_price(&self) -> Option<f64> {
        self.prices.iter().rev().copied().find(|p| p.is_finite())
    }

    /// Observations at or after `cutoff`. Untimed series are returned whole.
    pub fn since(&self, cutoff: DateTime<Utc>) -> PriceSeries {
        if self.timestamps.is_empty() {
            return self.clone();
        }
        let start = self.timestamps.partition_point(|t| *t < cutoff);
        Self {
            timestamps: self.timestamps[start..].to_vec(),
            prices: self.prices[start..].to_vec(),
        }
    }

    /// The last `n` observations
    pub fn tail(&self, n: usize) -> PriceSeries {
        let start = self.prices.len().saturating_sub(n);
        Self {
            timestamps: if self.timestamps.is_empty() {
                Vec::new()
            } else {
                self.timestamps[start..].to_vec()
            },
            prices: self.prices[start..].to_vec(),
        }
    }
}

impl From<Vec<f64>> for PriceSeries {
    fn from(prices: Vec<f64>) -> Self {
        Self::new(prices)
    }
}

/// Per-step log-return drift and dispersion fitted from a price series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReturnModel {
    drift_per_step: f64,
    dispersion_per_step: f64,
    last_price: f64,
}

impl ReturnModel {
    pub fn new(drift_per_step: f64, dispersion_per_step: f64, last_price: f64) -> Result<Self> {
        if !drift_per_step.is_finite() || !dispersion_per_step.is_finite() || !last_price.is_finite() {
            return Err(EngineError::invalid_input("return model parameters must be finite"));
        }
        if dispersion_per_step < 0.0 {
            return Err(EngineError::invalid_input("dispersion must be non-negative"));
        }
        if last_price <= 0.0 {
            return Err(EngineError::invalid_input("last price must be positive"));
        }
        Ok(Self { drift_per_step, dispersion_per_step, last_price })
    }

    pub fn drift_per_step(&self) -> f64 {
        self.drift_per_step
    }

    pub fn dispersion_per_step(&self) -> f64 {
        self.dispersion_per_step
    }

    pub fn last_price(&self) -> f64 {
        self.last_price
    }
}

/// Distribution summary of simulated terminal log-returns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionSummary {
    pub mean_return: f64,
    pub median_return: f64,         // P50
    pub upside_return: f64,         // P90
    pub value_at_risk_95: f64,      // P5 of the log-return
    pub median_terminal_price: f64, // Median taken over simulated prices directly
}

/// Raw simulated terminal outcomes, one entry per scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioBatch {
    pub last_price: f64,
    pub terminal_log_returns: Vec<f64>,
    pub terminal_prices: Vec<f64>,
}

/// How the per-step sampling mean is derived from the fitted drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftMode {
    /// Sample log-returns with mean equal to the fitted drift
    #[default]
    Raw,
    /// Sample with mean `drift - 0.5 * dispersion^2`
    ItoCorrected,
}

impl DriftMode {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "raw" => Some(Self::Raw),
            "ito" | "ito_corrected" => Some(Self::ItoCorrected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::ItoCorrected => "ito",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulationConfig {
    pub num_scenarios: usize,
    pub horizon_steps: usize,
    pub seed: u64,
    pub drift_mode: DriftMode,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_scenarios: DEFAULT_NUM_SCENARIOS,
            horizon_steps: DEFAULT_HORIZON_STEPS,
            seed: DEFAULT_SEED,
            drift_mode: DriftMode::Raw,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_scenarios < 1 {
            return Err(EngineError::invalid_parameter("num_scenarios must be at least 1"));
        }
        if self.horizon_steps < 1 {
            return Err(EngineError::invalid_parameter("horizon_steps must be at least 1"));
        }
        Ok(())
    }
}

/// Direction in which the EWMA recursion walks the return history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecursionOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl RecursionOrder {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "newest_first" => Some(Self::NewestFirst),
            "oldest_first" => Some(Self::OldestFirst),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewestFirst => "newest_first",
            Self::OldestFirst => "oldest_first",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolatilityConfig {
    pub decay: f64,
    pub horizon_steps: usize,
    pub boost: f64,
    pub order: RecursionOrder,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            decay: DEFAULT_EWMA_DECAY,
            horizon_steps: DEFAULT_VOL_HORIZON_STEPS,
            boost: DEFAULT_VOL_BOOST,
            order: RecursionOrder::NewestFirst,
        }
    }
}

impl VolatilityConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.decay > 0.0 && self.decay < 1.0) {
            return Err(EngineError::invalid_parameter(format!(
                "decay factor {} outside (0, 1)",
                self.decay
            )));
        }
        if self.horizon_steps < 1 {
            return Err(EngineError::invalid_parameter("horizon_steps must be at least 1"));
        }
        if !(self.boost.is_finite() && self.boost >= 1.0) {
            return Err(EngineError::invalid_parameter(format!("boost {} below 1", self.boost)));
        }
        Ok(())
    }
}

/// Forward volatility, scaled to the requested horizon and boosted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolatilityEstimate {
    pub per_step: f64, // sqrt of the EWMA variance, before boost
    pub horizon_steps: usize,
    pub boost: f64,
    pub value: f64,
}

/// Per-period returns, rows are aligned periods and columns are assets.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetReturnMatrix {
    labels: Vec<String>,
    returns: Array2<f64>,
}

impl AssetReturnMatrix {
    pub fn new(labels: Vec<String>, returns: Array2<f64>) -> Result<Self> {
        if labels.is_empty() {
            return Err(EngineError::invalid_input("return matrix needs at least one asset"));
        }
        if labels.len() != returns.ncols() {
            return Err(EngineError::invalid_input(format!(
                "{} labels for {} return columns",
                labels.len(),
                returns.ncols()
            )));
        }
        let mut seen = HashSet::with_capacity(labels.len());
        if let Some(dup) = labels.iter().find(|label| !seen.insert(label.as_str())) {
            return Err(EngineError::invalid_input(format!("duplicate asset label {}", dup)));
        }
        Ok(Self { labels, returns })
    }

    /// Convert labelled price series to simple returns with one row per common period.
    ///
    /// Timed series are aligned on the timestamps where every asset has a finite price.
    /// Untimed series are aligned on their most recent common window. Mixing the two is an error.
    pub fn from_price_series(series: &[(String, PriceSeries)]) -> Result<Self> {
        if series.is_empty() {
            return Err(EngineError::invalid_input("return matrix needs at least one asset"));
        }

        let timed = series.iter().filter(|(_, prices)| prices.timestamps().is_some()).count();
        let columns = if timed == series.len() {
            calendar_aligned_returns(series)?
        } else if timed == 0 {
            tail_aligned_returns(series)?
        } else {
            return Err(EngineError::invalid_input(
                "cannot align timed and untimed price series in one matrix",
            ));
        };

        let periods = columns[0].len();
        let returns = Array2::from_shape_fn((periods, columns.len()), |(row, col)| columns[col][row]);
        let labels = series.iter().map(|(label, _)| label.clone()).collect();
        Self::new(labels, returns)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn returns(&self) -> &Array2<f64> {
        &self.returns
    }

    pub fn num_periods(&self) -> usize {
        self.returns.nrows()
    }

    pub fn num_assets(&self) -> usize {
        self.returns.ncols()
    }
}

/// Returns over the timestamps shared by every series, missing prices excluded
fn calendar_aligned_returns(series: &[(String, PriceSeries)]) -> Result<Vec<Vec<f64>>> {
    let observed = |prices: &PriceSeries| -> Vec<DateTime<Utc>> {
        prices
            .timestamps
            .iter()
            .zip(prices.prices.iter())
            .filter(|(_, p)| p.is_finite())
            .map(|(t, _)| *t)
            .collect()
    };

    let mut common = observed(&series[0].1);
    for (_, prices) in &series[1..] {
        let dates: HashSet<DateTime<Utc>> = observed(prices).into_iter().collect();
        common.retain(|t| dates.contains(t));
    }

    series
        .iter()
        .map(|(_, prices)| {
            let aligned: Vec<f64> = common
                .iter()
                .filter_map(|t| prices.timestamps.binary_search(t).ok().map(|i| prices.prices[i]))
                .collect();
            simple_returns(&aligned)
        })
        .collect()
}

/// Latest `min_len` returns of every untimed series
fn tail_aligned_returns(series: &[(String, PriceSeries)]) -> Result<Vec<Vec<f64>>> {
    let columns = series
        .iter()
        .map(|(_, prices)| simple_returns(prices.prices()))
        .collect::<Result<Vec<_>>>()?;
    let min_length = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok(columns.into_iter().map(|column| column[column.len() - min_length..].to_vec()).collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetWeight {
    pub label: String,
    pub weight: f64,
}

/// Normalised allocation with its ex-ante metrics. Weights may be negative (short).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioWeights {
    pub weights: Vec<AssetWeight>,
    pub expected_return: f64,
    pub expected_risk: f64,
    pub sharpe_like_ratio: f64,
}

impl PortfolioWeights {
    pub fn weight(&self, label: &str) -> Option<f64> {
        self.weights.iter().find(|w| w.label == label).map(|w| w.weight)
    }

    pub fn weight_vector(&self) -> Array1<f64> {
        self.weights.iter().map(|w| w.weight).collect()
    }

    pub fn total_weight(&self) -> f64 {
        self.weights.iter().map(|w| w.weight).sum()
    }

    pub fn log_portfolio_weights(&self) {
        let mut sorted: Vec<&AssetWeight> = self.weights.iter().collect();
        sorted.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        let table = sorted
            .iter()
            .map(|w| format!("{}: Weight={:.2}%", w.label, w.weight * 100.0))
            .collect::<Vec<_>>()
            .join("\n  ");

        info!(
            "Optimal Portfolio (sorted by weight):\n  {}\n\nPortfolio Summary:\n  Total Weight: {:.2}%\n  Expected Return: {:.5}bps\n  Risk: {:.5}bps\n  Sharpe-like Ratio: {:.3}",
            table,
            self.total_weight() * 100.0,
            self.expected_return * 10000.0,
            self.expected_risk * 10000.0,
            self.sharpe_like_ratio
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PortfolioConfig {
    pub risk_aversion: f64,
    pub noise_std_dev: f64, // Perturbation on expected returns, 0 disables it
    pub seed: u64,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            risk_aversion: DEFAULT_RISK_AVERSION,
            noise_std_dev: 0.0,
            seed: DEFAULT_PORTFOLIO_SEED,
        }
    }
}

impl PortfolioConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.risk_aversion.is_finite() && self.risk_aversion > 0.0) {
            return Err(EngineError::invalid_parameter(format!(
                "risk aversion {} must be positive",
                self.risk_aversion
            )));
        }
        if !(self.noise_std_dev.is_finite() && self.noise_std_dev >= 0.0) {
            return Err(EngineError::invalid_parameter(format!(
                "noise std dev {} must be non-negative",
                self.noise_std_dev
            )));
        }
        Ok(())
    }
}

/// Mean simple return and volatility of one asset, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AssetRiskSummary {
    pub mean_return_pct: f64,
    pub volatility_pct: f64,
    pub observations: usize,
}

/// Everything the engine reports for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetReport {
    pub symbol: String,
    pub model: ReturnModel,
    pub prediction: PredictionSummary,
    pub volatility: VolatilityEstimate,
    pub risk: AssetRiskSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EngineConfig {
    pub simulation: SimulationConfig,
    pub volatility: VolatilityConfig,
    pub portfolio: PortfolioConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::array;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn timed_series_rejects_unordered_timestamps() {
        let err = PriceSeries::with_timestamps(vec![day(2), day(1)], vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));

        let err = PriceSeries::with_timestamps(vec![day(1)], vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn since_keeps_observations_at_or_after_cutoff() {
        let series =
            PriceSeries::with_timestamps(vec![day(1), day(2), day(3), day(4)], vec![1.0, 2.0, 3.0, 4.0])
                .unwrap();
        let window = series.since(day(2));
        assert_eq!(window.prices(), &[2.0, 3.0, 4.0]);
        assert_eq!(window.timestamps().unwrap().len(), 3);

        let untimed = PriceSeries::new(vec![1.0, 2.0]);
        assert_eq!(untimed.since(day(2)), untimed);
    }

    #[test]
    fn last_price_skips_trailing_missing_values() {
        let series = PriceSeries::new(vec![1.0, 2.0, f64::NAN]);
        assert_eq!(series.last_price(), Some(2.0));
        assert_eq!(series.tail(2).prices().len(), 2);
    }

    #[test]
    fn return_model_rejects_non_positive_last_price() {
        assert!(ReturnModel::new(0.0, 0.1, 0.0).is_err());
        assert!(ReturnModel::new(0.0, -0.1, 1.0).is_err());
        assert!(ReturnModel::new(f64::NAN, 0.1, 1.0).is_err());
        assert!(ReturnModel::new(0.001, 0.02, 100.0).is_ok());
    }

    #[test]
    fn return_matrix_validates_labels() {
        let returns = array![[0.01, 0.02], [0.03, -0.01]];
        let err = AssetReturnMatrix::new(vec!["A".into(), "A".into()], returns.clone()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));

        let err = AssetReturnMatrix::new(vec!["A".into()], returns.clone()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));

        let matrix = AssetReturnMatrix::new(vec!["A".into(), "B".into()], returns).unwrap();
        assert_eq!(matrix.num_assets(), 2);
        assert_eq!(matrix.num_periods(), 2);
    }

    #[test]
    fn from_price_series_aligns_on_latest_periods() {
        let series = vec![
            ("LONG".to_string(), PriceSeries::new(vec![100.0, 110.0, 121.0, 133.1])),
            ("SHORT".to_string(), PriceSeries::new(vec![50.0, 25.0, 50.0])),
        ];
        let matrix = AssetReturnMatrix::from_price_series(&series).unwrap();
        assert_eq!(matrix.num_periods(), 2);
        assert!((matrix.returns()[[0, 0]] - 0.1).abs() < 1e-12);
        assert!((matrix.returns()[[0, 1]] + 0.5).abs() < 1e-12);
        assert!((matrix.returns()[[1, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn timed_series_align_on_shared_dates() {
        let a = PriceSeries::with_timestamps(
            vec![day(1), day(2), day(3), day(4), day(5)],
            vec![100.0, 101.0, 102.0, 104.0, 105.0],
        )
        .unwrap();
        // No day 3 observation for B
        let b = PriceSeries::with_timestamps(vec![day(1), day(2), day(4), day(5)], vec![10.0, 12.0, 15.0, 12.0])
            .unwrap();
        let matrix =
            AssetReturnMatrix::from_price_series(&[("A".to_string(), a.clone()), ("B".to_string(), b)]).unwrap();

        assert_eq!(matrix.num_periods(), 3);
        // Row 1 spans day 2 -> day 4 for both assets
        assert!((matrix.returns()[[1, 0]] - (104.0 / 101.0 - 1.0)).abs() < 1e-12);
        assert!((matrix.returns()[[1, 1]] - 0.25).abs() < 1e-12);
        assert!((matrix.returns()[[2, 1]] + 0.2).abs() < 1e-12);

        let gappy = PriceSeries::with_timestamps(vec![day(1), day(3), day(5)], vec![10.0, f64::NAN, 11.0]).unwrap();
        let matrix =
            AssetReturnMatrix::from_price_series(&[("A".to_string(), a.clone()), ("C".to_string(), gappy)]).unwrap();
        assert_eq!(matrix.num_periods(), 1);
        assert!((matrix.returns()[[0, 0]] - 0.05).abs() < 1e-12);

        let untimed = PriceSeries::new(vec![1.0, 2.0, 3.0]);
        let err = AssetReturnMatrix::from_price_series(&[("A".to_string(), a), ("U".to_string(), untimed)])
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn engine_config_serializes_mode_names() {
        let value = serde_json::to_value(EngineConfig::default()).unwrap();
        assert_eq!(value["simulation"]["drift_mode"], "raw");
        assert_eq!(value["volatility"]["order"], "newest_first");
        assert_eq!(value["volatility"]["horizon_steps"], DEFAULT_VOL_HORIZON_STEPS);
        assert_eq!(value["portfolio"]["seed"], DEFAULT_PORTFOLIO_SEED);
    }

    #[test]
    fn config_validation_flags_out_of_range_values() {
        assert!(SimulationConfig { num_scenarios: 0, ..Default::default() }.validate().is_err());
        assert!(SimulationConfig { horizon_steps: 0, ..Default::default() }.validate().is_err());
        assert!(VolatilityConfig { decay: 1.0, ..Default::default() }.validate().is_err());
        assert!(VolatilityConfig { boost: 0.5, ..Default::default() }.validate().is_err());
        assert!(PortfolioConfig { risk_aversion: 0.0, ..Default::default() }.validate().is_err());
        assert!(PortfolioConfig { noise_std_dev: -1.0, ..Default::default() }.validate().is_err());
        assert!(EngineConfig::default().simulation.validate().is_ok());
    }

    #[test]
    fn mode_strings_round_trip() {
        assert_eq!(DriftMode::from_str("ITO"), Some(DriftMode::ItoCorrected));
        assert_eq!(DriftMode::from_str(DriftMode::Raw.as_str()), Some(DriftMode::Raw));
        assert_eq!(RecursionOrder::from_str("oldest_first"), Some(RecursionOrder::OldestFirst));
        assert_eq!(RecursionOrder::from_str("sideways"), None);
    }
}
