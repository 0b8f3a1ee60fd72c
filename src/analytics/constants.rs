// --- RETURN MODEL CONSTANTS ---
/// Added to the sample standard deviation so dispersion is never exactly zero
pub const DISPERSION_FLOOR: f64 = 1e-9;
/// Minimum number of usable prices needed to form one log-return
pub const MIN_PRICE_OBSERVATIONS: usize = 2;

// --- SCENARIO SIMULATOR CONSTANTS ---
pub const DEFAULT_NUM_SCENARIOS: usize = 10_000;
pub const DEFAULT_HORIZON_STEPS: usize = 30;
pub const DEFAULT_SEED: u64 = 42;
/// Percentiles reported in the prediction summary
pub const VAR_PERCENTILE: f64 = 5.0;
pub const MEDIAN_PERCENTILE: f64 = 50.0;
pub const UPSIDE_PERCENTILE: f64 = 90.0;

// --- VOLATILITY FORECASTER CONSTANTS ---
/// RiskMetrics daily decay
pub const DEFAULT_EWMA_DECAY: f64 = 0.94;
pub const DEFAULT_VOL_BOOST: f64 = 1.0;
/// Single-step forecast unless a longer horizon is configured
pub const DEFAULT_VOL_HORIZON_STEPS: usize = 1;

// --- PORTFOLIO OPTIMIZER CONSTANTS ---
/// Diagonal ridge added to the risk matrix, also the Sharpe-like denominator offset
pub const RIDGE_EPSILON: f64 = 1e-6;
/// Eigenvalues below this fraction of the largest are treated as zero in the pseudo-inverse
pub const PINV_RELATIVE_TOLERANCE: f64 = 1e-12;
pub const DEFAULT_RISK_AVERSION: f64 = 1.0;
pub const DEFAULT_PORTFOLIO_SEED: u64 = 7;
/// Minimum aligned periods for covariance estimation
pub const MIN_RETURN_PERIODS: usize = 2;
