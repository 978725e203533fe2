use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use crypto_trend_analyzer::analysis::{self, BarSource};
use crypto_trend_analyzer::klines::Timeframe;
use crypto_trend_analyzer::storage_utils::AsyncStorageManager;
use crypto_trend_analyzer::{logging, report};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Comma-separated symbols (e.g. "BTC,ETH"); defaults to config.json
    #[arg(long, value_delimiter = ',')]
    symbols: Option<Vec<String>>,

    /// Lookback preset; overridden by --interval/--limit
    #[arg(long, value_enum)]
    timeframe: Option<Timeframe>,

    /// Kline interval (e.g. "15m", "1h", "4h")
    #[arg(long)]
    interval: Option<String>,

    /// Number of klines per symbol
    #[arg(long)]
    limit: Option<u32>,

    /// Analyze a JSON array of bars instead of fetching from the exchange
    #[arg(long)]
    input: Option<PathBuf>,

    /// Storage directory for config.json and snapshots (default: next to the binary)
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Store a timestamped analysis snapshot
    #[arg(long)]
    save: bool,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_json);

    // Step 1: Load configuration
    let storage = match &cli.storage {
        Some(dir) => AsyncStorageManager::new(dir).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };
    let config = storage.load_config().await;

    // Step 2: Resolve the bar source
    let source = match cli.input {
        Some(path) => BarSource::File(path),
        None => {
            let (mut interval, mut limit) = (config.klines.interval.clone(), config.klines.limit);
            if let Some(timeframe) = cli.timeframe {
                let (preset_interval, preset_limit) = timeframe.kline_params();
                interval = preset_interval.to_string();
                limit = preset_limit;
            }
            BarSource::Exchange {
                symbols: cli.symbols.unwrap_or_else(|| config.symbols.clone()),
                interval: cli.interval.unwrap_or(interval),
                limit: cli.limit.unwrap_or(limit),
            }
        }
    };

    // Step 3: Analyze
    let record = analysis::run_analysis_pipeline(&source, &config, cli.save.then_some(&storage))
        .await
        .context("analysis pipeline failed")?;

    // Step 4: Display results
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        let rows: Vec<_> = record
            .results
            .into_iter()
            .map(|r| (r.symbol, r.analysis))
            .collect();
        println!("{}", report::render(&rows, record.generated_at));
    }

    Ok(())
}
