use thiserror::Error;

/// Result alias for analytics operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Typed failures surfaced by the analytics core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Not enough usable observations to fit anything.
    #[error("insufficient history: need at least {required} observations, got {available}")]
    InsufficientHistory { required: usize, available: usize },

    /// Non-positive prices, non-finite values or a malformed matrix.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Out-of-range tuning parameter (counts, decay, boost, aversion).
    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    /// Simulation requested before a return model was fitted.
    #[error("no return model fitted")]
    NotFitted,

    /// Raw weights sum to exactly zero and cannot be normalised.
    #[error("degenerate optimization: raw weights sum to zero")]
    DegenerateOptimization,

    /// Computation produced non-finite values.
    #[error("numerical instability in {context}")]
    NumericalInstability { context: String },
}

impl EngineError {
    pub fn insufficient_history(required: usize, available: usize) -> Self {
        Self::InsufficientHistory { required, available }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput { reason: reason.into() }
    }

    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::InvalidParameter { reason: reason.into() }
    }

    pub fn numerical_instability(context: impl Into<String>) -> Self {
        Self::NumericalInstability { context: context.into() }
    }
}
