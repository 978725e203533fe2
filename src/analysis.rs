//! The CLI's analysis pipeline: gather bars, analyze, optionally persist.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::AppConfig;
use crate::klines::{KlineClient, normalize_symbol};
use crate::series::Bar;
use crate::storage_utils::AsyncStorageManager;
use crate::trend::{TrendAnalysis, analyze_price_trends};

/// Where the bars come from for one run.
#[derive(Debug, Clone)]
pub enum BarSource {
    /// Live klines for these symbols.
    Exchange {
        symbols: Vec<String>,
        interval: String,
        limit: u32,
    },
    /// A JSON array of bars on disk, labelled by file stem.
    File(PathBuf),
}

#[derive(Serialize, Debug)]
pub struct AnalysisRecord {
    pub generated_at: DateTime<Utc>,
    pub results: Vec<SymbolAnalysis>,
}

#[derive(Serialize, Debug)]
pub struct SymbolAnalysis {
    pub symbol: String,
    pub bars: usize,
    pub analysis: TrendAnalysis,
}

pub async fn load_bars_file(path: &Path) -> Result<(String, Vec<Bar>)> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let bars: Vec<Bar> = serde_json::from_slice(&content)
        .with_context(|| format!("parsing bars from {}", path.display()))?;
    let label = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    Ok((label, bars))
}

async fn gather_bars(source: &BarSource, config: &AppConfig) -> Result<Vec<(String, Vec<Bar>)>> {
    match source {
        BarSource::File(path) => Ok(vec![load_bars_file(path).await?]),
        BarSource::Exchange {
            symbols,
            interval,
            limit,
        } => {
            let client = KlineClient::new(&config.api_base_url)?;
            let symbols: Vec<String> = symbols
                .iter()
                .map(|s| normalize_symbol(s, &config.quote_asset))
                .collect();

            // Failed symbols are analyzed with no bars, which yields the neutral result.
            Ok(client
                .fetch_many(&symbols, interval, *limit)
                .await
                .into_iter()
                .map(|(symbol, result)| (symbol, result.unwrap_or_default()))
                .collect())
        }
    }
}

/// Runs the whole pipeline:
/// 1. Collects bars from the exchange or a local file.
/// 2. Analyzes each symbol.
/// 3. Saves a timestamped record when `storage` is given.
pub async fn run_analysis_pipeline(
    source: &BarSource,
    config: &AppConfig,
    storage: Option<&AsyncStorageManager>,
) -> Result<AnalysisRecord> {
    config
        .analysis
        .validate()
        .context("invalid analysis configuration")?;

    let inputs = gather_bars(source, config).await?;

    let results: Vec<SymbolAnalysis> = inputs
        .into_iter()
        .map(|(symbol, bars)| SymbolAnalysis {
            analysis: analyze_price_trends(&bars, &config.analysis),
            bars: bars.len(),
            symbol,
        })
        .collect();

    let record = AnalysisRecord {
        generated_at: Utc::now(),
        results,
    };

    if let Some(storage) = storage {
        let path = storage
            .save_snapshot("analysis_history", record.generated_at, &record)
            .await
            .context("saving analysis snapshot")?;
        info!(path = %path.display(), "analysis snapshot stored");
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn write_bars(dir: &Path, name: &str, closes: &[f64]) -> PathBuf {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(start + Duration::hours(i as i64), c, c + 1.0, c - 1.0, c))
            .collect();
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_vec(&bars).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn analyzes_bars_from_file_and_saves_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let path = write_bars(dir.path(), "ETH.json", &closes);

        let storage = AsyncStorageManager::new(dir.path().join("storage"))
            .await
            .unwrap();
        let record = run_analysis_pipeline(
            &BarSource::File(path),
            &AppConfig::default(),
            Some(&storage),
        )
        .await
        .unwrap();

        assert_eq!(record.results.len(), 1);
        assert_eq!(record.results[0].symbol, "ETH");
        assert_eq!(record.results[0].bars, 60);
        assert_eq!(record.results[0].analysis.latest_price, 159.0);

        let saved: Vec<_> = std::fs::read_dir(dir.path().join("storage"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].starts_with("analysis_history_"));
    }

    #[tokio::test]
    async fn rejects_invalid_config_before_fetching() {
        let mut config = AppConfig::default();
        config.analysis.macd_fast = 40;
        let source = BarSource::File(PathBuf::from("does-not-matter.json"));
        let err = run_analysis_pipeline(&source, &config, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid analysis configuration"));
    }

    #[tokio::test]
    async fn missing_input_file_is_an_error() {
        let source = BarSource::File(PathBuf::from("/nonexistent/bars.json"));
        assert!(
            run_analysis_pipeline(&source, &AppConfig::default(), None)
                .await
                .is_err()
        );
    }
}
