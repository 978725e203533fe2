//! Combines indicators, patterns and Bollinger state into one trend call.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bollinger::{Band, BollingerBands, calculate_bollinger_bands};
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::indicators::{IndicatorSet, period_change_percent, price_change_percent};
use crate::patterns::{PatternMatch, PatternScanner};
use crate::series::{Bar, PriceSeries};

const STRONG_DEVIATION: f64 = 0.02;
const SIGNAL_DEVIATION: f64 = 0.03;
const MAX_CONFIDENCE: f64 = 0.95;
const SIDEWAYS_CONFIDENCE: f64 = 0.5;
const BAND_PROXIMITY: f64 = 0.05;
const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendStrength {
    Strong,
    Moderate,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trend::Bullish => "bullish",
            Trend::Bearish => "bearish",
            Trend::Sideways => "sideways",
            Trend::Unknown => "unknown",
        })
    }
}

impl fmt::Display for TrendStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrendStrength::Strong => "strong",
            TrendStrength::Moderate => "moderate",
            TrendStrength::Unknown => "unknown",
        })
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct SupportResistance {
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrendAnalysis {
    pub trend: Trend,
    pub trend_strength: TrendStrength,
    pub signal: Signal,
    pub confidence: f64,
    pub indicators: IndicatorSet,
    pub patterns: Vec<PatternMatch>,
    pub bollinger_bands: Option<BollingerBands>,
    pub support_resistance: SupportResistance,
    pub analysis: String,
    pub price_change_percent: f64,
    pub latest_price: f64,
    pub period_change_percent: f64,
}

impl TrendAnalysis {
    /// The neutral result returned whenever analysis cannot run.
    pub fn default_result() -> Self {
        Self {
            trend: Trend::Unknown,
            trend_strength: TrendStrength::Unknown,
            signal: Signal::Hold,
            confidence: 0.0,
            indicators: IndicatorSet::default(),
            patterns: Vec::new(),
            bollinger_bands: None,
            support_resistance: SupportResistance::default(),
            analysis: "Insufficient price data for trend analysis.".to_string(),
            price_change_percent: 0.0,
            latest_price: 0.0,
            period_change_percent: 0.0,
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default_result()
    }
}

/// |price - sma| / sma, or `None` when the average is zero.
fn deviation(price: f64, sma: f64) -> Option<f64> {
    if sma == 0.0 {
        return None;
    }
    let dev = (price - sma).abs() / sma.abs();
    dev.is_finite().then_some(dev)
}

pub fn classify_trend(price: f64, sma_short: Option<f64>, sma_long: Option<f64>) -> Trend {
    match (sma_short, sma_long) {
        (Some(short), Some(long)) if price > short && short > long => Trend::Bullish,
        (Some(short), Some(long)) if price < short && short < long => Trend::Bearish,
        (Some(_), Some(_)) => Trend::Sideways,
        _ => Trend::Unknown,
    }
}

pub fn classify_strength(trend: Trend, price: f64, sma_short: Option<f64>) -> TrendStrength {
    if trend == Trend::Unknown {
        return TrendStrength::Unknown;
    }
    let dev = sma_short.and_then(|sma| deviation(price, sma)).unwrap_or(0.0);
    if dev > STRONG_DEVIATION {
        TrendStrength::Strong
    } else {
        TrendStrength::Moderate
    }
}

/// Signal and confidence. Confidence scales with distance from the short SMA.
pub fn trading_signal(trend: Trend, price: f64, sma_short: Option<f64>) -> (Signal, f64) {
    let dev = sma_short.and_then(|sma| deviation(price, sma)).unwrap_or(0.0);
    let scaled = (dev * 5.0).min(MAX_CONFIDENCE);
    match trend {
        Trend::Bullish if dev > SIGNAL_DEVIATION => (Signal::Buy, scaled),
        Trend::Bearish if dev > SIGNAL_DEVIATION => (Signal::Sell, scaled),
        Trend::Bullish | Trend::Bearish => (Signal::Hold, scaled),
        Trend::Sideways => (Signal::Hold, SIDEWAYS_CONFIDENCE),
        Trend::Unknown => (Signal::Hold, 0.0),
    }
}

fn support_resistance(
    patterns: &[PatternMatch],
    bands: Option<&BollingerBands>,
) -> SupportResistance {
    SupportResistance {
        support: patterns
            .iter()
            .find_map(|p| p.support_level)
            .or(bands.map(|b| b.lower)),
        resistance: patterns
            .iter()
            .find_map(|p| p.resistance_level)
            .or(bands.map(|b| b.upper)),
    }
}

struct NarrativeInputs<'a> {
    trend: Trend,
    strength: TrendStrength,
    price: f64,
    price_change: f64,
    indicators: &'a IndicatorSet,
    patterns: &'a [PatternMatch],
    bands: Option<&'a BollingerBands>,
}

fn compose_narrative(inputs: &NarrativeInputs<'_>) -> String {
    let mut parts = Vec::new();

    match inputs.trend {
        Trend::Unknown => parts.push(
            "Trend is unknown: not enough history for both moving averages.".to_string(),
        ),
        trend => parts.push(format!(
            "The market is in a {trend} trend with {} strength.",
            inputs.strength
        )),
    }

    let change = inputs.price_change;
    parts.push(if change > 0.0 {
        format!("Price rose {change:.2}% over the last bar.")
    } else if change < 0.0 {
        format!("Price fell {:.2}% over the last bar.", change.abs())
    } else {
        "Price was unchanged over the last bar.".to_string()
    });

    if let Some(rsi) = inputs.indicators.rsi_14 {
        parts.push(if rsi > RSI_OVERBOUGHT {
            format!("RSI at {rsi:.1} signals overbought conditions.")
        } else if rsi < RSI_OVERSOLD {
            format!("RSI at {rsi:.1} signals oversold conditions.")
        } else {
            format!("RSI at {rsi:.1} is in neutral territory.")
        });
    }

    if let (Some(macd), Some(signal)) = (inputs.indicators.macd, inputs.indicators.macd_signal) {
        parts.push(if macd > signal {
            "MACD is above its signal line, indicating bullish momentum.".to_string()
        } else {
            "MACD is at or below its signal line, indicating bearish momentum.".to_string()
        });
    }

    for pattern in inputs.patterns.iter().take(2) {
        parts.push(format!("{}.", pattern.description));
    }

    if let Some(bands) = inputs.bands {
        match bands.near_band(inputs.price, BAND_PROXIMITY) {
            Some(Band::Upper) => parts.push(format!(
                "Price is trading near the upper Bollinger Band ({:.2}).",
                bands.upper
            )),
            Some(Band::Lower) => parts.push(format!(
                "Price is trading near the lower Bollinger Band ({:.2}).",
                bands.lower
            )),
            None => {}
        }
        if bands.squeeze {
            parts.push("Bollinger bandwidth is contracting (squeeze).".to_string());
        }
    }

    parts.join(" ")
}

/// Runs the full pipeline on a validated series.
pub fn try_analyze(
    series: &PriceSeries,
    config: &AnalysisConfig,
) -> Result<TrendAnalysis, AnalysisError> {
    config.validate()?;

    let closes = series.closes();
    let price = series.last_close();

    let indicators = IndicatorSet::compute(closes, config);
    let patterns = PatternScanner::from_config(config).scan(closes);
    let bands = calculate_bollinger_bands(
        closes,
        config.bollinger_window,
        config.bollinger_std,
        config.squeeze_window,
    );

    let trend = classify_trend(price, indicators.sma_20, indicators.sma_50);
    let strength = classify_strength(trend, price, indicators.sma_20);
    let (signal, confidence) = trading_signal(trend, price, indicators.sma_20);
    let price_change = price_change_percent(closes);

    let analysis = compose_narrative(&NarrativeInputs {
        trend,
        strength,
        price,
        price_change,
        indicators: &indicators,
        patterns: &patterns,
        bands: bands.as_ref(),
    });
    debug!(
        bars = series.len(),
        complete = indicators.is_complete(),
        %trend,
        %signal,
        patterns = patterns.len(),
        "trend analysis complete"
    );

    Ok(TrendAnalysis {
        trend,
        trend_strength: strength,
        signal,
        confidence,
        support_resistance: support_resistance(&patterns, bands.as_ref()),
        indicators,
        patterns,
        bollinger_bands: bands,
        analysis,
        price_change_percent: price_change,
        latest_price: price,
        period_change_percent: period_change_percent(closes),
    })
}

/// Like [`try_analyze`] but never fails: any error yields the default result.
pub fn analyze_series(series: &PriceSeries, config: &AnalysisConfig) -> TrendAnalysis {
    try_analyze(series, config).unwrap_or_else(|e| {
        warn!(error = %e, "trend analysis failed, returning neutral result");
        TrendAnalysis::default_result()
    })
}

/// Entry point for raw bars straight from a collector.
pub fn analyze_price_trends(bars: &[Bar], config: &AnalysisConfig) -> TrendAnalysis {
    match PriceSeries::new(bars.to_vec()) {
        Ok(series) => analyze_series(&series, config),
        Err(e @ AnalysisError::InsufficientData { .. }) => {
            debug!(error = %e, "not enough bars to analyze");
            TrendAnalysis::default_result()
        }
        Err(e) => {
            warn!(error = %e, "rejected price series");
            TrendAnalysis::default_result()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_requires_strict_ordering() {
        assert_eq!(classify_trend(110.0, Some(105.0), Some(100.0)), Trend::Bullish);
        assert_eq!(classify_trend(90.0, Some(95.0), Some(100.0)), Trend::Bearish);
        assert_eq!(classify_trend(105.0, Some(105.0), Some(100.0)), Trend::Sideways);
        assert_eq!(classify_trend(104.0, Some(105.0), Some(100.0)), Trend::Sideways);
        assert_eq!(classify_trend(104.0, Some(105.0), None), Trend::Unknown);
        assert_eq!(classify_trend(104.0, None, None), Trend::Unknown);
    }

    #[test]
    fn strength_threshold_is_two_percent() {
        assert_eq!(
            classify_strength(Trend::Bullish, 103.0, Some(100.0)),
            TrendStrength::Strong
        );
        assert_eq!(
            classify_strength(Trend::Bullish, 101.0, Some(100.0)),
            TrendStrength::Moderate
        );
        assert_eq!(
            classify_strength(Trend::Unknown, 150.0, Some(100.0)),
            TrendStrength::Unknown
        );
    }

    #[test]
    fn signal_and_confidence_scale_with_deviation() {
        let (signal, confidence) = trading_signal(Trend::Bullish, 104.0, Some(100.0));
        assert_eq!(signal, Signal::Buy);
        assert!((confidence - 0.2).abs() < 1e-12);

        let (signal, confidence) = trading_signal(Trend::Bullish, 102.0, Some(100.0));
        assert_eq!(signal, Signal::Hold);
        assert!((confidence - 0.1).abs() < 1e-12);

        let (signal, confidence) = trading_signal(Trend::Bearish, 50.0, Some(100.0));
        assert_eq!(signal, Signal::Sell);
        assert_eq!(confidence, 0.95);

        assert_eq!(trading_signal(Trend::Sideways, 100.0, Some(100.0)), (Signal::Hold, 0.5));
        assert_eq!(trading_signal(Trend::Unknown, 100.0, None), (Signal::Hold, 0.0));
    }

    #[test]
    fn zero_average_does_not_divide() {
        assert_eq!(
            classify_strength(Trend::Sideways, 1.0, Some(0.0)),
            TrendStrength::Moderate
        );
        assert_eq!(trading_signal(Trend::Bearish, 1.0, Some(0.0)), (Signal::Hold, 0.0));
    }

    #[test]
    fn levels_prefer_patterns_over_bands() {
        let bands = BollingerBands {
            middle: 100.0,
            upper: 110.0,
            lower: 90.0,
            bandwidth: 20.0,
            squeeze: false,
        };
        assert_eq!(
            support_resistance(&[], Some(&bands)),
            SupportResistance {
                support: Some(90.0),
                resistance: Some(110.0)
            }
        );
        assert_eq!(support_resistance(&[], None), SupportResistance::default());
    }

    #[test]
    fn serialises_enums_like_the_dashboard_expects() {
        let json = serde_json::to_value(TrendAnalysis::default_result()).unwrap();
        assert_eq!(json["trend"], "unknown");
        assert_eq!(json["trend_strength"], "unknown");
        assert_eq!(json["signal"], "HOLD");
        assert!(json["indicators"]["sma_20"].is_null());
        assert!(json["bollinger_bands"].is_null());
        assert!(json["support_resistance"]["support"].is_null());
    }

    #[test]
    fn narrative_mentions_rsi_zone_and_band() {
        let indicators = IndicatorSet {
            rsi_14: Some(75.0),
            macd: Some(1.0),
            macd_signal: Some(0.5),
            ..IndicatorSet::default()
        };
        let bands = BollingerBands {
            middle: 100.0,
            upper: 110.0,
            lower: 90.0,
            bandwidth: 20.0,
            squeeze: false,
        };
        let text = compose_narrative(&NarrativeInputs {
            trend: Trend::Bullish,
            strength: TrendStrength::Strong,
            price: 109.0,
            price_change: 1.5,
            indicators: &indicators,
            patterns: &[],
            bands: Some(&bands),
        });
        assert!(text.starts_with("The market is in a bullish trend with strong strength."));
        assert!(text.contains("Price rose 1.50%"));
        assert!(text.contains("overbought"));
        assert!(text.contains("bullish momentum"));
        assert!(text.contains("upper Bollinger Band (110.00)"));
    }

    #[test]
    fn invalid_config_falls_back_to_default() {
        let series = PriceSeries::from_closes(&[1.0, 2.0, 3.0]).unwrap();
        let config = AnalysisConfig {
            sma_short: 0,
            ..AnalysisConfig::default()
        };
        assert!(try_analyze(&series, &config).is_err());
        assert!(analyze_series(&series, &config).is_default());
    }
}
