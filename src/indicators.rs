//! Moving averages, RSI and MACD over a closing-price column.
//!
//! Every function degrades to `None` when the history is shorter than its
//! window; nothing here returns NaN or infinity.

use serde::{Deserialize, Serialize};
use ta::Next;
use ta::indicators::MovingAverageConvergenceDivergence;

use crate::config::AnalysisConfig;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IndicatorSet {
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
}

impl IndicatorSet {
    /// Field names follow the default windows; the configured windows are
    /// what is actually computed.
    pub fn compute(closes: &[f64], config: &AnalysisConfig) -> Self {
        let (macd, macd_signal) =
            calculate_macd(closes, config.macd_fast, config.macd_slow, config.macd_signal)
                .map_or((None, None), |m| (Some(m.macd), m.signal));

        Self {
            sma_20: calculate_sma(closes, config.sma_short),
            sma_50: calculate_sma(closes, config.sma_long),
            rsi_14: calculate_rsi(closes, config.rsi_window),
            macd,
            macd_signal,
            macd_histogram: macd.zip(macd_signal).and_then(|(m, s)| finite(m - s)),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.sma_20.is_some()
            && self.sma_50.is_some()
            && self.rsi_14.is_some()
            && self.macd.is_some()
            && self.macd_signal.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdReading {
    pub macd: f64,
    /// `None` until the signal EMA has `signal` MACD points to work with.
    pub signal: Option<f64>,
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Neumaier-compensated sum.
pub(crate) fn compensated_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0_f64;
    let mut compensation = 0.0;
    for value in values {
        let total = sum + value;
        compensation += if sum.abs() >= value.abs() {
            (sum - total) + value
        } else {
            (value - total) + sum
        };
        sum = total;
    }
    sum + compensation
}

/// Arithmetic mean taken as offsets from the window minimum. A constant
/// window yields its value exactly, and the result does not depend on the
/// order of the window beyond the last bit.
pub(crate) fn window_mean(window: &[f64]) -> Option<f64> {
    let base = window.iter().copied().fold(f64::INFINITY, f64::min);
    if !base.is_finite() {
        return None;
    }
    let offsets = compensated_sum(window.iter().map(|x| x - base));
    finite(base + offsets / window.len() as f64)
}

/// Mean of the last `window` closes.
pub fn calculate_sma(closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || closes.len() < window {
        return None;
    }
    window_mean(&closes[closes.len() - window..])
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        // No losses: RS is unbounded. A window with no movement at all is neutral.
        return if avg_gain > 0.0 { 100.0 } else { 50.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// RSI at every index, using simple rolling means of gains and losses over
/// `window` deltas. The first `window` entries are `None`.
pub fn rsi_series(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if window == 0 || closes.len() <= window {
        return out;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    for t in window..closes.len() {
        let span = &deltas[t - window..t];
        let gain: f64 = span.iter().filter(|d| **d > 0.0).sum();
        let loss: f64 = span.iter().filter(|d| **d < 0.0).map(|d| -d).sum();
        out[t] = finite(rsi_from_averages(gain / window as f64, loss / window as f64));
    }
    out
}

/// RSI of the most recent `window` deltas.
pub fn calculate_rsi(closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || closes.len() <= window {
        return None;
    }
    rsi_series(&closes[closes.len() - window - 1..], window)
        .last()
        .copied()
        .flatten()
}

/// MACD line (EMA fast − EMA slow) and its signal EMA, seeded with the first
/// close. The line is reported once `slow` closes exist.
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<MacdReading> {
    if closes.len() < slow {
        return None;
    }
    let mut indicator = MovingAverageConvergenceDivergence::new(fast, slow, signal).ok()?;

    let mut last = None;
    for &price in closes {
        last = Some(indicator.next(price));
    }
    let output = last?;

    let signal_ready = closes.len() + 1 >= slow + signal;
    Some(MacdReading {
        macd: finite(output.macd)?,
        signal: if signal_ready { finite(output.signal) } else { None },
    })
}

/// Percent change between the last two closes; 0.0 when undefined.
pub fn price_change_percent(closes: &[f64]) -> f64 {
    match closes {
        [.., prev, last] if *prev != 0.0 => finite((last - prev) / prev * 100.0).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Percent change from the first to the last close; 0.0 when undefined.
pub fn period_change_percent(closes: &[f64]) -> f64 {
    match (closes.first(), closes.last()) {
        (Some(&first), Some(&last)) if closes.len() >= 2 && first != 0.0 => {
            finite(((last / first) - 1.0) * 100.0).unwrap_or(0.0)
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn sma_uses_last_window() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_close(calculate_sma(&closes, 3).unwrap(), 4.0);
        assert_close(calculate_sma(&closes, 5).unwrap(), 3.0);
        assert_eq!(calculate_sma(&closes, 6), None);
        assert_eq!(calculate_sma(&closes, 0), None);
    }

    #[test]
    fn sma_of_constant_closes_is_exact() {
        for level in [9.99, 0.1, 1.0e-7, 33_333.33, 64_123.456] {
            let closes = vec![level; 60];
            assert_eq!(calculate_sma(&closes, 20), Some(level));
            assert_eq!(calculate_sma(&closes, 50), Some(level));
        }
    }

    #[test]
    fn window_mean_ignores_order() {
        let forward = [0.1, 0.2, 0.3, 1e5, 0.7, 3.3];
        let mut backward = forward;
        backward.reverse();
        let (a, b) = (window_mean(&forward).unwrap(), window_mean(&backward).unwrap());
        assert!((a - b).abs() <= f64::EPSILON * a.abs(), "{a} vs {b}");
        assert_eq!(compensated_sum([1e16, 1.0, -1e16]), 1.0);
    }

    #[test]
    fn rsi_is_100_without_losses() {
        let closes = rising(20);
        assert_eq!(calculate_rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn rsi_flat_window_is_neutral() {
        let closes = vec![42.0; 20];
        assert_eq!(calculate_rsi(&closes, 14), Some(50.0));
    }

    #[test]
    fn rsi_matches_hand_computation() {
        // deltas over the last 4: +2, -1, +1, -2 -> gain 3/4, loss 3/4 -> RSI 50
        let closes = [10.0, 12.0, 11.0, 12.0, 10.0];
        assert_close(calculate_rsi(&closes, 4).unwrap(), 50.0);

        // deltas: +3, -1 -> gain 1.5, loss 0.5 -> RS 3 -> RSI 75
        let closes = [10.0, 13.0, 12.0];
        assert_close(calculate_rsi(&closes, 2).unwrap(), 75.0);
    }

    #[test]
    fn rsi_needs_window_plus_one_closes() {
        let closes = rising(14);
        assert_eq!(calculate_rsi(&closes, 14), None);
        let series = rsi_series(&rising(16), 14);
        assert_eq!(series.iter().filter(|v| v.is_some()).count(), 2);
        assert!(series[13].is_none());
        assert!(series[14].is_some());
    }

    #[test]
    fn rsi_stays_in_range() {
        let closes: Vec<f64> = (0..200)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 10.0 + (i % 7) as f64)
            .collect();
        for value in rsi_series(&closes, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn macd_follows_adjust_false_recurrence() {
        let closes: Vec<f64> = (0..60).map(|i| 50.0 + (i as f64 * 0.3).cos() * 5.0).collect();

        let ema = |values: &[f64], span: usize| -> Vec<f64> {
            let alpha = 2.0 / (span as f64 + 1.0);
            let mut out = Vec::with_capacity(values.len());
            for (i, &v) in values.iter().enumerate() {
                let next = if i == 0 { v } else { alpha * v + (1.0 - alpha) * out[i - 1] };
                out.push(next);
            }
            out
        };
        let fast = ema(&closes, 12);
        let slow = ema(&closes, 26);
        let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let signal = ema(&line, 9);

        let reading = calculate_macd(&closes, 12, 26, 9).unwrap();
        assert!((reading.macd - line[59]).abs() < 1e-9);
        assert!((reading.signal.unwrap() - signal[59]).abs() < 1e-9);
    }

    #[test]
    fn macd_unavailable_on_short_history() {
        assert_eq!(calculate_macd(&rising(25), 12, 26, 9), None);
        let partial = calculate_macd(&rising(30), 12, 26, 9).unwrap();
        assert!(partial.signal.is_none());
        assert!(calculate_macd(&rising(34), 12, 26, 9).unwrap().signal.is_some());
    }

    #[test]
    fn price_change_handles_zero_and_short_input() {
        assert_close(price_change_percent(&[100.0, 110.0]), 10.0);
        assert_eq!(price_change_percent(&[0.0, 5.0]), 0.0);
        assert_eq!(price_change_percent(&[5.0]), 0.0);
        assert_eq!(price_change_percent(&[]), 0.0);
    }

    #[test]
    fn period_change_spans_whole_series() {
        assert_close(period_change_percent(&[50.0, 10.0, 75.0]), 50.0);
        assert_eq!(period_change_percent(&[0.0, 75.0]), 0.0);
        assert_eq!(period_change_percent(&[75.0]), 0.0);
    }

    #[test]
    fn indicator_set_reports_missing_fields() {
        let config = AnalysisConfig::default();
        let short = IndicatorSet::compute(&rising(30), &config);
        assert!(short.sma_20.is_some());
        assert!(short.sma_50.is_none());
        assert!(short.rsi_14.is_some());
        assert!(short.macd.is_some());
        assert!(short.macd_signal.is_none());
        assert!(!short.is_complete());

        let full = IndicatorSet::compute(&rising(60), &config);
        assert!(full.is_complete());
        assert!(full.macd_histogram.is_some());
    }
}
