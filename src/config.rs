use chrono::Duration;
use dotenvy::dotenv;
use eyre::{Result, WrapErr, eyre};
use std::env;
use std::str::FromStr;

use crate::analytics::types::{
    DriftMode, EngineConfig, PortfolioConfig, RecursionOrder, SimulationConfig, VolatilityConfig,
};

const DEFAULT_SYMBOLS: &str = "BTC-USD,ETH-USD,SPY";
const DEFAULT_PRICE_DATA_PATH: &str = "data/prices.json";
const DEFAULT_LOOKBACK_DAYS: i64 = 365;
const MAX_LOOKBACK_DAYS: i64 = 36_500;

#[derive(Debug, Clone)]
pub struct Config {
    pub symbols: Vec<String>,
    pub price_data_path: String,
    pub lookback_days: i64,
    pub engine: EngineConfig,
}

impl Config {
    /// Load from `.env` (if present) and the process environment
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults, malformed ones are errors
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let symbols = lookup("QUANTUM_SYMBOLS")
            .unwrap_or_else(|| DEFAULT_SYMBOLS.to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if symbols.is_empty() {
            return Err(eyre!("QUANTUM_SYMBOLS must list at least one symbol"));
        }

        let price_data_path = lookup("PRICE_DATA_PATH").unwrap_or_else(|| DEFAULT_PRICE_DATA_PATH.to_string());
        let lookback_days = parse_or(&lookup, "LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS)?;
        if !(1..=MAX_LOOKBACK_DAYS).contains(&lookback_days) {
            return Err(eyre!(
                "LOOKBACK_DAYS must be between 1 and {}, got {}",
                MAX_LOOKBACK_DAYS,
                lookback_days
            ));
        }

        let sim_defaults = SimulationConfig::default();
        let drift_mode = match lookup("MC_DRIFT_MODE") {
            Some(raw) => DriftMode::from_str(&raw).ok_or_else(|| eyre!("Invalid MC_DRIFT_MODE value {}", raw))?,
            None => sim_defaults.drift_mode,
        };
        let simulation = SimulationConfig {
            num_scenarios: parse_or(&lookup, "MC_SCENARIOS", sim_defaults.num_scenarios)?,
            horizon_steps: parse_or(&lookup, "MC_HORIZON_STEPS", sim_defaults.horizon_steps)?,
            seed: parse_or(&lookup, "MC_SEED", sim_defaults.seed)?,
            drift_mode,
        };

        let vol_defaults = VolatilityConfig::default();
        let order = match lookup("EWMA_ORDER") {
            Some(raw) => RecursionOrder::from_str(&raw).ok_or_else(|| eyre!("Invalid EWMA_ORDER value {}", raw))?,
            None => vol_defaults.order,
        };
        let volatility = VolatilityConfig {
            decay: parse_or(&lookup, "EWMA_DECAY", vol_defaults.decay)?,
            horizon_steps: parse_or(&lookup, "EWMA_HORIZON_STEPS", vol_defaults.horizon_steps)?,
            boost: parse_or(&lookup, "EWMA_BOOST", vol_defaults.boost)?,
            order,
        };

        let port_defaults = PortfolioConfig::default();
        let portfolio = PortfolioConfig {
            risk_aversion: parse_or(&lookup, "RISK_AVERSION", port_defaults.risk_aversion)?,
            noise_std_dev: parse_or(&lookup, "PORTFOLIO_NOISE_STD", port_defaults.noise_std_dev)?,
            seed: parse_or(&lookup, "PORTFOLIO_SEED", port_defaults.seed)?,
        };

        // Surface parameter problems at startup rather than on the first call
        simulation.validate().wrap_err("Invalid simulation settings")?;
        volatility.validate().wrap_err("Invalid volatility settings")?;
        portfolio.validate().wrap_err("Invalid portfolio settings")?;

        Ok(Config {
            symbols,
            price_data_path,
            lookback_days,
            engine: EngineConfig { simulation, volatility, portfolio },
        })
    }

    /// History window handed to the price provider
    pub fn lookback(&self) -> Result<Duration> {
        Duration::try_days(self.lookback_days)
            .ok_or_else(|| eyre!("LOOKBACK_DAYS {} is out of range", self.lookback_days))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| eyre!("Invalid {} value {}: {}", key, raw, e)),
        None => Ok(default),
    }
}
