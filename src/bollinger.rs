//! Bollinger Bands for the most recent window, plus the bandwidth squeeze flag.

use serde::{Deserialize, Serialize};

use crate::indicators::{compensated_sum, window_mean};

/// Relative margin the current bandwidth must clear below its average
/// before it counts as a squeeze; absorbs rounding between windows.
const SQUEEZE_MARGIN: f64 = 1e-9;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
    /// 2 * num_std * std / middle * 100
    pub bandwidth: f64,
    /// Current bandwidth is below its own rolling average.
    pub squeeze: bool,
}

impl BollingerBands {
    /// Which outer band, if any, `price` sits within `tolerance` (fractional) of.
    pub fn near_band(&self, price: f64, tolerance: f64) -> Option<Band> {
        let upper_gap = (price - self.upper).abs() / self.upper.abs();
        let lower_gap = (price - self.lower).abs() / self.lower.abs();
        match (upper_gap <= tolerance, lower_gap <= tolerance) {
            (true, true) if lower_gap < upper_gap => Some(Band::Lower),
            (true, _) => Some(Band::Upper),
            (false, true) => Some(Band::Lower),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Upper,
    Lower,
}

/// Mean and sample standard deviation (n - 1) of one window. Both are
/// independent of the order of values inside the window.
fn mean_std(window: &[f64]) -> Option<(f64, f64)> {
    let mean = window_mean(window)?;
    if window.len() < 2 {
        return Some((mean, 0.0));
    }
    let squares = compensated_sum(window.iter().map(|x| (x - mean).powi(2)));
    Some((mean, (squares / (window.len() as f64 - 1.0)).sqrt()))
}

/// Bandwidth at every index from `window - 1` onward. An index whose middle
/// band is zero has no bandwidth.
fn bandwidth_series(closes: &[f64], window: usize, num_std: f64) -> Vec<Option<f64>> {
    closes
        .windows(window)
        .map(|w| {
            let (mean, std) = mean_std(w)?;
            if mean == 0.0 {
                return None;
            }
            let width = (2.0 * num_std * std) / mean * 100.0;
            width.is_finite().then_some(width)
        })
        .collect()
}

/// Bands over the last `window` closes. `None` when fewer than `window`
/// closes exist or the bands are not finite.
pub fn calculate_bollinger_bands(
    closes: &[f64],
    window: usize,
    num_std: f64,
    squeeze_window: usize,
) -> Option<BollingerBands> {
    if window == 0 || closes.len() < window {
        return None;
    }

    let (middle, std) = mean_std(&closes[closes.len() - window..])?;
    let upper = middle + std * num_std;
    let lower = middle - std * num_std;
    if !(upper.is_finite() && lower.is_finite()) || middle == 0.0 {
        return None;
    }

    // The current bandwidth is the last entry of the history it is compared with.
    let widths = bandwidth_series(closes, window, num_std);
    let bandwidth = widths.last().copied().flatten()?;
    let squeeze = match widths.len().checked_sub(squeeze_window) {
        Some(start) if squeeze_window > 0 => {
            let recent: Option<Vec<f64>> = widths[start..].iter().copied().collect();
            recent.is_some_and(|recent| {
                let average = compensated_sum(recent.iter().copied()) / recent.len() as f64;
                bandwidth < average * (1.0 - SQUEEZE_MARGIN)
            })
        }
        _ => false,
    };

    Some(BollingerBands {
        middle,
        upper,
        lower,
        bandwidth,
        squeeze,
    })
}
