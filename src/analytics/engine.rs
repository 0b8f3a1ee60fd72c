use chrono::Duration;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::{
    allocator, returns, scenario, summary, volatility,
    error::{EngineError, Result},
    types::{
        AssetReport, AssetReturnMatrix, EngineConfig, PortfolioWeights, PredictionSummary,
        PriceSeries, ReturnModel, ScenarioBatch, VolatilityEstimate,
    },
};
use crate::market_data::{PriceHistoryProvider, ProviderError};

/// Failure of a provider-backed analysis for one symbol or one portfolio.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Facade over the analytics operations.
///
/// Holds only configuration; every call builds its own generator from the configured
/// seed, so a single engine can be shared across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantumEngine {
    config: EngineConfig,
}

impl QuantumEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn estimate_return_model(&self, series: &PriceSeries) -> Result<ReturnModel> {
        returns::estimate_return_model(series)
    }

    /// Fit a return model and simulate forward with the configured scenario settings
    #[instrument(skip(self, series), fields(observations = series.len()))]
    pub fn predict(&self, series: &PriceSeries) -> Result<PredictionSummary> {
        let model = returns::estimate_return_model(series)?;
        scenario::simulate(&model, &self.config.simulation)
    }

    pub fn simulate(&self, model: &ReturnModel) -> Result<PredictionSummary> {
        scenario::simulate(model, &self.config.simulation)
    }

    pub fn simulate_batch(&self, model: &ReturnModel) -> Result<ScenarioBatch> {
        scenario::simulate_batch(model, &self.config.simulation)
    }

    #[instrument(skip(self, series), fields(observations = series.len()))]
    pub fn forecast_volatility(&self, series: &PriceSeries) -> Result<VolatilityEstimate> {
        volatility::forecast_volatility(series, &self.config.volatility)
    }

    #[instrument(skip(self, matrix), fields(assets = matrix.num_assets(), periods = matrix.num_periods()))]
    pub fn optimize_portfolio(&self, matrix: &AssetReturnMatrix) -> Result<PortfolioWeights> {
        allocator::optimize_portfolio(matrix, &self.config.portfolio)
    }

    /// Model, prediction, volatility and risk summary for one series
    pub fn analyze_series(&self, symbol: &str, series: &PriceSeries) -> Result<AssetReport> {
        let model = returns::estimate_return_model(series)?;
        let prediction = scenario::simulate(&model, &self.config.simulation)?;
        let volatility = volatility::forecast_volatility(series, &self.config.volatility)?;
        let risk = summary::summarize_asset(series)?;

        Ok(AssetReport { symbol: symbol.to_string(), model, prediction, volatility, risk })
    }

    /// Analyse every symbol in parallel; each symbol keeps its own outcome
    #[instrument(name = "analyze_symbols", skip_all, fields(symbols = symbols.len(), timed = true))]
    pub fn analyze_symbols<P: PriceHistoryProvider>(
        &self,
        provider: &P,
        symbols: &[String],
        lookback: Duration,
    ) -> Vec<(String, std::result::Result<AssetReport, AnalysisError>)> {
        info!("Starting symbol analysis...");

        let results: Vec<(String, std::result::Result<AssetReport, AnalysisError>)> = symbols
            .par_iter()
            .map(|symbol| {
                let outcome = provider
                    .price_history(symbol, lookback)
                    .map_err(AnalysisError::from)
                    .and_then(|series| self.analyze_series(symbol, &series).map_err(AnalysisError::from));
                (symbol.clone(), outcome)
            })
            .collect();

        for (symbol, outcome) in &results {
            match outcome {
                Ok(report) => debug!(
                    symbol = %symbol,
                    median_return = report.prediction.median_return,
                    volatility = report.volatility.value,
                    "Symbol analysed"
                ),
                Err(e) => warn!(symbol = %symbol, error = %e, "Symbol analysis failed"),
            }
        }

        results
    }

    /// Fetch every symbol, align their returns and optimise the allocation
    #[instrument(name = "optimize_symbols", skip_all, fields(symbols = symbols.len(), timed = true))]
    pub fn optimize_symbols<P: PriceHistoryProvider>(
        &self,
        provider: &P,
        symbols: &[String],
        lookback: Duration,
    ) -> std::result::Result<PortfolioWeights, AnalysisError> {
        let series = symbols
            .iter()
            .map(|symbol| provider.price_history(symbol, lookback).map(|s| (symbol.clone(), s)))
            .collect::<std::result::Result<Vec<_>, ProviderError>>()?;

        let matrix = AssetReturnMatrix::from_price_series(&series)?;
        debug!(periods = matrix.num_periods(), "Return matrix aligned");

        Ok(self.optimize_portfolio(&matrix)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::types::SimulationConfig;
    use crate::market_data::InMemoryPriceProvider;

    fn provider() -> InMemoryPriceProvider {
        let mut provider = InMemoryPriceProvider::new();
        provider.insert("UP", PriceSeries::new((0..60).map(|i| 100.0 * 1.002f64.powi(i) + (i % 3) as f64).collect()));
        provider.insert("WIGGLE", PriceSeries::new((0..60).map(|i| 50.0 + ((i as f64) * 0.7).sin() * 2.0).collect()));
        provider.insert("SHORT", PriceSeries::new(vec![10.0]));
        provider
    }

    fn engine() -> QuantumEngine {
        QuantumEngine::new(EngineConfig {
            simulation: SimulationConfig { num_scenarios: 500, horizon_steps: 5, ..Default::default() },
            ..Default::default()
        })
    }

    #[test]
    fn analyze_symbols_keeps_per_symbol_outcomes() {
        let symbols = vec!["UP".to_string(), "WIGGLE".to_string(), "SHORT".to_string(), "MISSING".to_string()];
        let results = engine().analyze_symbols(&provider(), &symbols, Duration::days(365));

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].0, "UP");
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_ok());
        assert!(matches!(
            results[2].1,
            Err(AnalysisError::Engine(EngineError::InsufficientHistory { .. }))
        ));
        assert!(matches!(results[3].1, Err(AnalysisError::Provider(ProviderError::UnknownSymbol(_)))));
    }

    #[test]
    fn analysis_matches_direct_calls() {
        let engine = engine();
        let series = provider().price_history("UP", Duration::days(365)).unwrap();
        let report = engine.analyze_series("UP", &series).unwrap();

        assert_eq!(report.prediction, engine.predict(&series).unwrap());
        assert_eq!(report.volatility, engine.forecast_volatility(&series).unwrap());
        assert_eq!(report.model, engine.estimate_return_model(&series).unwrap());
    }

    #[test]
    fn optimize_symbols_builds_weights_for_each_symbol() {
        let symbols = vec!["UP".to_string(), "WIGGLE".to_string()];
        let weights = engine().optimize_symbols(&provider(), &symbols, Duration::days(365)).unwrap();
        assert_eq!(weights.weights.len(), 2);
        assert!((weights.total_weight() - 1.0).abs() < 1e-9);

        let missing = engine().optimize_symbols(&provider(), &["NOPE".to_string()], Duration::days(365));
        assert!(matches!(missing, Err(AnalysisError::Provider(_))));
    }
}
