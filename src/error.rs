use thiserror::Error;

/// Failure taxonomy for the calibration/simulation pipeline.
///
/// `Validation` and `DimensionMismatch` are client errors and map to HTTP 400
/// at the server boundary; everything else is a computation failure (500).
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("correlation matrix is not positive definite after {attempts} jitter attempts")]
    CorrelationStability { attempts: usize },

    #[error("{0}")]
    Validation(String),

    #[error("market data error: {0}")]
    MarketData(String),
}

pub type Result<T> = std::result::Result<T, RiskError>;
