use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::CollectorError;
use crate::series::{Bar, PriceSeries};

const KLINES_PATH: &str = "/fapi/v1/klines";
const DEFAULT_WEIGHT_LIMIT: u32 = 2400;

const KLINE_KEYS: &[&str] = &[
    "openTime",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "closeTime",
    "quoteAssetVolume",
    "numberOfTrades",
    "takerBuyBaseAssetVolume",
    "takerBuyQuoteAssetVolume",
    "ignore",
];

/// Lookback presets offered by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Timeframe {
    #[value(name = "24h")]
    Day,
    #[value(name = "7d")]
    Week,
    #[value(name = "30d")]
    Month,
}

impl Timeframe {
    /// `(interval, limit)` covering the lookback.
    pub fn kline_params(&self) -> (&'static str, u32) {
        match self {
            Timeframe::Day => ("15m", 96),
            Timeframe::Week => ("1h", 168),
            Timeframe::Month => ("4h", 180),
        }
    }
}

// --- Lenient decoding ---

#[derive(Deserialize, Debug)]
struct RawKline {
    #[serde(rename = "openTime")]
    open_time: i64,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    high: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    low: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    close: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    volume: Option<f64>,
}

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

/// Turns Binance's positional kline rows into bars. Rows without a close
/// or with an unusable open time are skipped.
pub fn decode_klines(raw: Vec<Vec<Value>>) -> Result<Vec<Bar>, CollectorError> {
    let mut bars = Vec::with_capacity(raw.len());
    for row in raw {
        let keyed: Map<String, Value> = KLINE_KEYS
            .iter()
            .zip(row)
            .map(|(&key, val)| (key.to_string(), val))
            .collect();
        let kline: RawKline = serde_json::from_value(Value::Object(keyed))?;

        let (Some(close), Some(timestamp)) =
            (kline.close, DateTime::from_timestamp_millis(kline.open_time))
        else {
            debug!(open_time = kline.open_time, "skipping incomplete kline");
            continue;
        };
        bars.push(Bar {
            timestamp,
            open: kline.open.unwrap_or(close),
            high: kline.high.unwrap_or(close),
            low: kline.low.unwrap_or(close),
            close,
            volume: kline.volume,
        });
    }
    Ok(bars)
}

// --- Request helpers ---

/// `BTC` -> `BTCUSDT`; symbols already ending in the quote asset pass through.
pub fn normalize_symbol(symbol: &str, quote_asset: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    let quote = quote_asset.trim().to_uppercase();
    if symbol.ends_with(&quote) && symbol.len() > quote.len() {
        symbol
    } else {
        format!("{symbol}{quote}")
    }
}

pub fn calculate_request_weight(limit: u32) -> u32 {
    match limit {
        0..=99 => 1,
        100..=499 => 2,
        500..=1000 => 5,
        _ => 10,
    }
}

/// Extracts the `until <ms>` timestamp from a `-1003` IP-ban message.
pub fn parse_ban_until(body: &str) -> Option<u64> {
    if !body.contains("-1003") {
        return None;
    }
    let re = Regex::new(r"until\s+(\d+)").ok()?;
    re.captures(body)?.get(1)?.as_str().parse().ok()
}

pub struct KlineClient {
    client: Client,
    base_url: String,
}

impl KlineClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CollectorError> {
        let client = Client::builder().pool_max_idle_per_host(50).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn fetch_bars(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Bar>, CollectorError> {
        let url = format!("{}{}", self.base_url, KLINES_PATH);
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();

        if status.as_u16() == 418 || status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            let now = Utc::now().timestamp_millis().max(0) as u64;
            let retry_after_ms = parse_ban_until(&body)
                .map(|until| until.saturating_sub(now))
                .unwrap_or(0);
            return Err(CollectorError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            return Err(CollectorError::Status(status.as_u16()));
        }

        let raw: Vec<Vec<Value>> = serde_json::from_slice(&response.bytes().await?)?;
        // Reject responses the core could not analyze: too short or out of order.
        let series = PriceSeries::new(decode_klines(raw)?)?;
        debug!(symbol, interval, bars = series.len(), "fetched klines");
        Ok(series.into_bars())
    }

    /// Fetches every symbol, in batches sized to the exchange's per-minute
    /// weight budget. A failed symbol does not stop the others.
    pub async fn fetch_many(
        &self,
        symbols: &[String],
        interval: &str,
        limit: u32,
    ) -> Vec<(String, Result<Vec<Bar>, CollectorError>)> {
        let weight_per_req = calculate_request_weight(limit);
        let safe_capacity = (DEFAULT_WEIGHT_LIMIT as f64 * 0.90) as u32;
        let batch_size = std::cmp::max(1, safe_capacity / weight_per_req) as usize;

        let mut all_results = Vec::with_capacity(symbols.len());
        for (i, batch) in symbols.chunks(batch_size).enumerate() {
            let start_time = Instant::now();

            let tasks = batch.iter().map(|s| self.fetch_bars(s, interval, limit));
            let results = futures::future::join_all(tasks).await;
            for (symbol, result) in batch.iter().zip(results) {
                if let Err(e) = &result {
                    warn!(symbol = %symbol, error = %e, "kline fetch failed");
                }
                all_results.push((symbol.clone(), result));
            }

            if i * batch_size + batch.len() < symbols.len() {
                let elapsed = start_time.elapsed();
                if elapsed.as_secs() < 60 {
                    let wait = Duration::from_secs(62) - elapsed;
                    info!(wait_secs = wait.as_secs(), "waiting for request weight to reset");
                    tokio::time::sleep(wait).await;
                }
            }
        }
        all_results
    }
}
