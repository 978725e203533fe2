use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ANALYSIS WINDOWS & DETECTOR TUNING
// Every field has a default, so a partial JSON object is enough.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub sma_short: usize,   // e.g., 20 bars
    pub sma_long: usize,    // e.g., 50 bars
    pub rsi_window: usize,  // e.g., 14 deltas
    pub macd_fast: usize,   // EMA span
    pub macd_slow: usize,   // EMA span
    pub macd_signal: usize, // EMA span over the MACD line
    pub bollinger_window: usize,
    pub bollinger_std: f64,

    /// Rolling window used to average bandwidth for the squeeze flag.
    pub squeeze_window: usize,
    /// Minimum series length before the triangle fit is attempted.
    pub pattern_min_bars: usize,
    /// Half-width of the rolling max/min window used for triangle trend lines.
    pub extrema_radius: usize,
    pub shoulder_tolerance: f64,
    pub double_tolerance: f64,
    /// Slope below which a trend line counts as flat, in price units per bar.
    pub triangle_flat_tolerance: f64,
    /// Divide fitted slopes by the mean price before classifying triangles.
    pub normalize_triangle_slopes: bool,
    pub divergence_enabled: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sma_short: 20,
            sma_long: 50,
            rsi_window: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_window: 20,
            bollinger_std: 2.0,
            squeeze_window: 20,
            pattern_min_bars: 20,
            extrema_radius: 5,
            shoulder_tolerance: 0.10,
            double_tolerance: 0.02,
            triangle_flat_tolerance: 0.001,
            normalize_triangle_slopes: false,
            divergence_enabled: true,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let windows = [
            ("sma_short", self.sma_short),
            ("sma_long", self.sma_long),
            ("rsi_window", self.rsi_window),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("bollinger_window", self.bollinger_window),
            ("squeeze_window", self.squeeze_window),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, w)| *w == 0) {
            return Err(ConfigError::ZeroWindow(name));
        }
        if self.sma_short >= self.sma_long {
            return Err(ConfigError::ShortNotBelowLong {
                short: self.sma_short,
                long: self.sma_long,
            });
        }
        if self.macd_fast >= self.macd_slow {
            return Err(ConfigError::FastNotBelowSlow {
                fast: self.macd_fast,
                slow: self.macd_slow,
            });
        }
        if !self.bollinger_std.is_finite() || self.bollinger_std <= 0.0 {
            return Err(ConfigError::NonPositiveStd(self.bollinger_std));
        }

        let tolerances = [
            ("shoulder_tolerance", self.shoulder_tolerance),
            ("double_tolerance", self.double_tolerance),
            ("triangle_flat_tolerance", self.triangle_flat_tolerance),
        ];
        for (name, value) in tolerances {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::ToleranceOutOfRange { name, value });
            }
        }
        Ok(())
    }

    /// Longest history any indicator needs before it reports a value.
    pub fn max_window(&self) -> usize {
        [
            self.sma_long,
            self.sma_short,
            self.rsi_window + 1,
            self.macd_slow + self.macd_signal - 1,
            self.bollinger_window,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

// APPLICATION CONFIG
// Loaded from `<storage>/config.json` by the CLI.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KlineConfig {
    pub limit: u32,       // e.g., 168 candles
    pub interval: String, // e.g., "15m", "1h", "4h"
}

impl Default for KlineConfig {
    fn default() -> Self {
        Self {
            limit: 168,
            interval: "1h".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub symbols: Vec<String>,
    pub quote_asset: String, // e.g., "USDT"
    pub api_base_url: String,
    pub klines: KlineConfig,
    pub analysis: AnalysisConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC".to_string(), "ETH".to_string()],
            quote_asset: "USDT".to_string(),
            api_base_url: "https://fapi.binance.com".to_string(),
            klines: KlineConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_window(), 50);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: AnalysisConfig =
            serde_json::from_str(r#"{ "sma_short": 10, "bollinger_std": 2.5 }"#).unwrap();
        assert_eq!(config.sma_short, 10);
        assert_eq!(config.sma_long, 50);
        assert_eq!(config.bollinger_std, 2.5);
    }

    #[test]
    fn rejects_zero_and_inverted_windows() {
        let zero = AnalysisConfig {
            rsi_window: 0,
            ..AnalysisConfig::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::ZeroWindow("rsi_window")));

        let inverted = AnalysisConfig {
            macd_fast: 30,
            ..AnalysisConfig::default()
        };
        assert_eq!(
            inverted.validate(),
            Err(ConfigError::FastNotBelowSlow { fast: 30, slow: 26 })
        );
    }

    #[test]
    fn app_config_reads_nested_sections() {
        let json = r#"{
            "symbols": ["SOL"],
            "klines": { "interval": "4h" },
            "analysis": { "rsi_window": 7 }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.symbols, vec!["SOL"]);
        assert_eq!(config.klines.interval, "4h");
        assert_eq!(config.klines.limit, 168);
        assert_eq!(config.analysis.rsi_window, 7);
        assert_eq!(config.quote_asset, "USDT");
    }
}
