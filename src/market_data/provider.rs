use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::analytics::error::EngineError;
use crate::analytics::types::PriceSeries;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("failed to read price file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse price data: {0}")]
    Parse(String),

    #[error("no price history for symbol {0}")]
    UnknownSymbol(String),

    #[error("no observations for {symbol} within the last {lookback_days} days")]
    EmptyWindow { symbol: String, lookback_days: i64 },
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<EngineError> for ProviderError {
    fn from(err: EngineError) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Source of historical prices for a symbol over a lookback window.
pub trait PriceHistoryProvider: Send + Sync {
    fn price_history(&self, symbol: &str, lookback: Duration) -> Result<PriceSeries, ProviderError>;
}

/// One close observation; `null` closes are kept as missing values
#[derive(Debug, Clone, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub close: Option<f64>,
}

/// Provider backed by series held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceProvider {
    series: HashMap<String, PriceSeries>,
}

impl InMemoryPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, series: PriceSeries) {
        self.series.insert(symbol.into().to_uppercase(), series);
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

impl PriceHistoryProvider for InMemoryPriceProvider {
    fn price_history(&self, symbol: &str, lookback: Duration) -> Result<PriceSeries, ProviderError> {
        let series = self
            .series
            .get(&symbol.to_uppercase())
            .ok_or_else(|| ProviderError::UnknownSymbol(symbol.to_string()))?;
        apply_lookback(symbol, series, lookback)
    }
}

/// Provider reading a JSON object of `{ "SYMBOL": [{ "timestamp": ..., "close": ... }] }`.
#[derive(Debug, Clone)]
pub struct JsonFilePriceProvider {
    inner: InMemoryPriceProvider,
}

impl JsonFilePriceProvider {
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|source| ProviderError::Io { path: path.to_path_buf(), source })?;
        let provider = Self::from_json(&contents)?;
        debug!(symbols = provider.inner.series.len(), "Price file loaded");
        Ok(provider)
    }

    pub fn from_json(contents: &str) -> Result<Self, ProviderError> {
        let raw: HashMap<String, Vec<PriceBar>> = serde_json::from_str(contents)?;
        let mut inner = InMemoryPriceProvider::new();
        for (symbol, mut bars) in raw {
            if inner.series.contains_key(&symbol.to_uppercase()) {
                return Err(ProviderError::Parse(format!(
                    "symbol {} appears more than once ignoring case",
                    symbol
                )));
            }
            bars.sort_by_key(|bar| bar.timestamp);
            let timestamps = bars.iter().map(|bar| bar.timestamp).collect();
            let prices = bars.iter().map(|bar| bar.close.unwrap_or(f64::NAN)).collect();
            inner.insert(symbol, PriceSeries::with_timestamps(timestamps, prices)?);
        }
        Ok(Self { inner })
    }

    pub fn symbols(&self) -> Vec<String> {
        self.inner.symbols()
    }
}

impl PriceHistoryProvider for JsonFilePriceProvider {
    fn price_history(&self, symbol: &str, lookback: Duration) -> Result<PriceSeries, ProviderError> {
        self.inner.price_history(symbol, lookback)
    }
}

/// Keep observations no older than `lookback` before the latest timestamp.
/// A lookback reaching past the representable date range keeps the whole series.
fn apply_lookback(symbol: &str, series: &PriceSeries, lookback: Duration) -> Result<PriceSeries, ProviderError> {
    let cutoff = series
        .timestamps()
        .and_then(|ts| ts.last())
        .and_then(|latest| latest.checked_sub_signed(lookback));
    let window = match cutoff {
        Some(cutoff) => series.since(cutoff),
        None => series.clone(),
    };
    if window.is_empty() {
        return Err(ProviderError::EmptyWindow {
            symbol: symbol.to_string(),
            lookback_days: lookback.num_days(),
        });
    }
    Ok(window)
}
