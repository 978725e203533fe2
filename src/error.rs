//! Error types shared by the analysis core and the collector.

use thiserror::Error;

/// Problems with an `AnalysisConfig`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("window `{0}` must be greater than zero")]
    ZeroWindow(&'static str),

    #[error("macd_fast ({fast}) must be smaller than macd_slow ({slow})")]
    FastNotBelowSlow { fast: usize, slow: usize },

    #[error("sma_short ({short}) must be smaller than sma_long ({long})")]
    ShortNotBelowLong { short: usize, long: usize },

    #[error("bollinger_std must be positive and finite, got {0}")]
    NonPositiveStd(f64),

    #[error("tolerance `{name}` must be within (0, 1), got {value}")]
    ToleranceOutOfRange { name: &'static str, value: f64 },
}

/// Errors raised while building a series or running an analysis.
///
/// `analyze_price_trends` absorbs all of these and returns the neutral
/// default result instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("insufficient data: need {required} bars, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("timestamps must be strictly increasing (violated at bar {index})")]
    NonMonotonicTimestamps { index: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl AnalysisError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        AnalysisError::InvalidInput(msg.into())
    }
}

/// Errors from the kline collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by exchange, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("exchange returned status {0}")]
    Status(u16),

    #[error("could not decode kline payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Series(#[from] AnalysisError),
}
