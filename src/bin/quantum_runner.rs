use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};

use quantum_engine::analytics::{AssetReport, EngineConfig, PortfolioWeights, QuantumEngine};
use quantum_engine::config;
use quantum_engine::logging;
use quantum_engine::market_data::JsonFilePriceProvider;

#[derive(Debug, Serialize)]
struct RunReport {
    generated_at: String,
    symbols: Vec<String>,
    lookback_days: i64,
    config: EngineConfig,
    reports: Vec<AssetReport>,
    errors: BTreeMap<String, String>,
    portfolio: Option<PortfolioWeights>,
    portfolio_error: Option<String>,
}

#[instrument(name = "quantum_runner_main")]
fn main() -> eyre::Result<()> {
    // Load configuration (reads .env if present)
    let cfg = config::Config::load()?;

    if let Err(e) = logging::init_logging(env!("CARGO_BIN_NAME")) {
        eprintln!("Failed to initialize logging: {}", e);
        return Err(e);
    }
    info!(
        symbols = ?cfg.symbols,
        price_data_path = %cfg.price_data_path,
        lookback_days = cfg.lookback_days,
        "Configuration loaded and logging initialized"
    );

    let provider = JsonFilePriceProvider::load(&cfg.price_data_path)?;
    let engine = QuantumEngine::new(cfg.engine);
    let lookback = cfg.lookback()?;

    let mut reports = Vec::new();
    let mut errors = BTreeMap::new();
    for (symbol, outcome) in engine.analyze_symbols(&provider, &cfg.symbols, lookback) {
        match outcome {
            Ok(report) => reports.push(report),
            Err(e) => {
                errors.insert(symbol, e.to_string());
            }
        }
    }
    info!(analysed = reports.len(), failed = errors.len(), "Symbol analysis completed");

    // Only symbols that analysed cleanly take part in the allocation
    let portfolio_symbols: Vec<String> = reports.iter().map(|r| r.symbol.clone()).collect();
    let (portfolio, portfolio_error) = if portfolio_symbols.is_empty() {
        warn!("No symbols available for portfolio optimisation");
        (None, Some("no symbols analysed successfully".to_string()))
    } else {
        match engine.optimize_symbols(&provider, &portfolio_symbols, lookback) {
            Ok(weights) => {
                weights.log_portfolio_weights();
                (Some(weights), None)
            }
            Err(e) => {
                error!(error = %e, "Portfolio optimisation failed");
                (None, Some(e.to_string()))
            }
        }
    };

    let run_report = RunReport {
        generated_at: Utc::now().to_rfc3339(),
        symbols: cfg.symbols.clone(),
        lookback_days: cfg.lookback_days,
        config: cfg.engine,
        reports,
        errors,
        portfolio,
        portfolio_error,
    };
    println!("{}", serde_json::to_string_pretty(&run_report)?);

    Ok(())
}
