//! Technical-analysis core for crypto price series: indicators, chart
//! patterns, Bollinger state and a combined trend call, plus the thin
//! collector, storage and report glue used by the CLI.

pub mod analysis;
pub mod bollinger;
pub mod config;
pub mod error;
pub mod indicators;
pub mod klines;
pub mod logging;
pub mod patterns;
pub mod report;
pub mod series;
pub mod storage_utils;
pub mod trend;

pub use config::{AnalysisConfig, AppConfig};
pub use error::{AnalysisError, ConfigError};
pub use series::{Bar, PriceSeries};
pub use trend::{Signal, Trend, TrendAnalysis, TrendStrength, analyze_price_trends};
