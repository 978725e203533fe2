//! Chart-pattern detection over a closing-price column.
//!
//! Each detector reports at most one match per call and stops at the first
//! qualifying set of extrema, scanning oldest to newest. Detectors return
//! `Ok(None)` for "not present" and `Err` only when the input itself is
//! unusable; [`PatternScanner`] folds both into "absent".

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::indicators::rsi_series;

const HEAD_AND_SHOULDERS_CONFIDENCE: f64 = 0.8;
const DOUBLE_TOP_BOTTOM_CONFIDENCE: f64 = 0.85;
const DIRECTIONAL_TRIANGLE_CONFIDENCE: f64 = 0.85;
const SYMMETRICAL_TRIANGLE_CONFIDENCE: f64 = 0.75;
const DIVERGENCE_CONFIDENCE: f64 = 0.75;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    HeadAndShoulders,
    DoubleTop,
    DoubleBottom,
    AscendingTriangle,
    DescendingTriangle,
    SymmetricalTriangle,
    BullishDivergence,
    BearishDivergence,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::HeadAndShoulders => "head_and_shoulders",
            PatternType::DoubleTop => "double_top",
            PatternType::DoubleBottom => "double_bottom",
            PatternType::AscendingTriangle => "ascending_triangle",
            PatternType::DescendingTriangle => "descending_triangle",
            PatternType::SymmetricalTriangle => "symmetrical_triangle",
            PatternType::BullishDivergence => "bullish_divergence",
            PatternType::BearishDivergence => "bearish_divergence",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            PatternType::HeadAndShoulders => {
                "Head and shoulders formation - possible trend reversal"
            }
            PatternType::DoubleTop => "Double top formation - possible bearish reversal",
            PatternType::DoubleBottom => "Double bottom formation - possible bullish reversal",
            PatternType::AscendingTriangle => "Ascending triangle - bullish breakout setup",
            PatternType::DescendingTriangle => "Descending triangle - bearish breakdown setup",
            PatternType::SymmetricalTriangle => "Symmetrical triangle - breakout direction open",
            PatternType::BullishDivergence => {
                "Bullish RSI divergence - lower price lows against higher RSI lows"
            }
            PatternType::BearishDivergence => {
                "Bearish RSI divergence - higher price highs against lower RSI highs"
            }
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PatternMatch {
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    pub confidence: f64,
    pub start_index: usize,
    pub end_index: usize,
    pub description: String,
    pub support_level: Option<f64>,
    pub resistance_level: Option<f64>,
}

impl PatternMatch {
    fn new(pattern_type: PatternType, confidence: f64, start_index: usize, end_index: usize) -> Self {
        Self {
            pattern_type,
            confidence: confidence.clamp(0.0, 1.0),
            start_index,
            end_index,
            description: pattern_type.description().to_string(),
            support_level: None,
            resistance_level: None,
        }
    }

    fn with_levels(mut self, support: f64, resistance: f64) -> Self {
        self.support_level = support.is_finite().then_some(support);
        self.resistance_level = resistance.is_finite().then_some(resistance);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremum {
    pub index: usize,
    pub value: f64,
}

/// Strict local maxima: `v[i-1] < v[i] > v[i+1]`. Endpoints never qualify.
pub fn find_peaks(values: &[f64]) -> Vec<Extremum> {
    values
        .windows(3)
        .enumerate()
        .filter(|(_, w)| w[0] < w[1] && w[1] > w[2])
        .map(|(i, w)| Extremum {
            index: i + 1,
            value: w[1],
        })
        .collect()
}

/// Strict local minima: `v[i-1] > v[i] < v[i+1]`.
pub fn find_troughs(values: &[f64]) -> Vec<Extremum> {
    values
        .windows(3)
        .enumerate()
        .filter(|(_, w)| w[0] > w[1] && w[1] < w[2])
        .map(|(i, w)| Extremum {
            index: i + 1,
            value: w[1],
        })
        .collect()
}

fn ensure_finite(closes: &[f64]) -> Result<(), AnalysisError> {
    match closes.iter().position(|c| !c.is_finite()) {
        Some(i) => Err(AnalysisError::invalid_input(format!(
            "non-finite close at index {i}"
        ))),
        None => Ok(()),
    }
}

fn min_between(closes: &[f64], start: usize, end: usize) -> f64 {
    closes[start..=end].iter().copied().fold(f64::INFINITY, f64::min)
}

fn max_between(closes: &[f64], start: usize, end: usize) -> f64 {
    closes[start..=end]
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max)
}

/// One pluggable pattern check.
pub trait PatternDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, closes: &[f64]) -> Result<Option<PatternMatch>, AnalysisError>;
}

// --- Head and shoulders ---

pub struct HeadAndShouldersDetector {
    /// Shorter series are never scanned.
    pub min_bars: usize,
    pub shoulder_tolerance: f64,
}

impl PatternDetector for HeadAndShouldersDetector {
    fn name(&self) -> &'static str {
        "head_and_shoulders"
    }

    fn detect(&self, closes: &[f64]) -> Result<Option<PatternMatch>, AnalysisError> {
        ensure_finite(closes)?;
        if closes.len() < self.min_bars {
            return Ok(None);
        }
        let peaks = find_peaks(closes);

        let found = peaks.windows(3).find(|triple| {
            let (left, head, right) = (triple[0], triple[1], triple[2]);
            head.value > left.value
                && head.value > right.value
                && (left.value - right.value).abs() / left.value < self.shoulder_tolerance
        });

        Ok(found.map(|triple| {
            let (left, head, right) = (triple[0], triple[1], triple[2]);
            PatternMatch::new(
                PatternType::HeadAndShoulders,
                HEAD_AND_SHOULDERS_CONFIDENCE,
                left.index,
                right.index,
            )
            .with_levels(min_between(closes, left.index, right.index), head.value)
        }))
    }
}

// --- Double top / bottom ---

pub struct DoubleTopBottomDetector {
    pub min_bars: usize,
    pub tolerance: f64,
}

impl DoubleTopBottomDetector {
    fn first_pair(&self, extrema: &[Extremum]) -> Option<(Extremum, Extremum)> {
        extrema
            .windows(2)
            .find(|pair| (pair[0].value - pair[1].value).abs() / pair[0].value < self.tolerance)
            .map(|pair| (pair[0], pair[1]))
    }
}

impl PatternDetector for DoubleTopBottomDetector {
    fn name(&self) -> &'static str {
        "double_top_bottom"
    }

    fn detect(&self, closes: &[f64]) -> Result<Option<PatternMatch>, AnalysisError> {
        ensure_finite(closes)?;
        if closes.len() < self.min_bars {
            return Ok(None);
        }

        if let Some((a, b)) = self.first_pair(&find_peaks(closes)) {
            let pattern = PatternMatch::new(
                PatternType::DoubleTop,
                DOUBLE_TOP_BOTTOM_CONFIDENCE,
                a.index,
                b.index,
            )
            .with_levels(min_between(closes, a.index, b.index), a.value.max(b.value));
            return Ok(Some(pattern));
        }

        if let Some((a, b)) = self.first_pair(&find_troughs(closes)) {
            let pattern = PatternMatch::new(
                PatternType::DoubleBottom,
                DOUBLE_TOP_BOTTOM_CONFIDENCE,
                a.index,
                b.index,
            )
            .with_levels(a.value.min(b.value), max_between(closes, a.index, b.index));
            return Ok(Some(pattern));
        }

        Ok(None)
    }
}

// --- Triangles ---

pub struct TriangleDetector {
    pub min_bars: usize,
    pub radius: usize,
    pub flat_tolerance: f64,
    /// Compare slopes as a fraction of the mean price instead of raw price units.
    pub normalize_slopes: bool,
}

/// Least-squares line through `(i, ys[i])`. Returns `(slope, intercept)`.
pub fn linear_fit(ys: &[f64]) -> Option<(f64, f64)> {
    if ys.len() < 2 {
        return None;
    }
    let n = ys.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = ys.iter().sum::<f64>() / n;

    let (num, den) = ys
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });
    if den == 0.0 {
        return None;
    }
    let slope = num / den;
    Some((slope, y_mean - slope * x_mean))
}

impl TriangleDetector {
    fn rolling(&self, closes: &[f64], pick: fn(f64, f64) -> f64, init: f64) -> Vec<f64> {
        let last = closes.len() - 1;
        (0..closes.len())
            .map(|i| {
                let lo = i.saturating_sub(self.radius);
                let hi = (i + self.radius).min(last);
                closes[lo..=hi].iter().copied().fold(init, pick)
            })
            .collect()
    }
}

impl PatternDetector for TriangleDetector {
    fn name(&self) -> &'static str {
        "triangle"
    }

    fn detect(&self, closes: &[f64]) -> Result<Option<PatternMatch>, AnalysisError> {
        ensure_finite(closes)?;
        if closes.len() < self.min_bars.max(2) {
            return Ok(None);
        }

        let highs = self.rolling(closes, f64::max, f64::NEG_INFINITY);
        let lows = self.rolling(closes, f64::min, f64::INFINITY);
        let (Some((high_slope, high_icpt)), Some((low_slope, low_icpt))) =
            (linear_fit(&highs), linear_fit(&lows))
        else {
            return Ok(None);
        };

        let scale = if self.normalize_slopes {
            let mean = closes.iter().sum::<f64>() / closes.len() as f64;
            if mean == 0.0 {
                return Err(AnalysisError::invalid_input(
                    "cannot normalise slopes of a zero-mean series",
                ));
            }
            mean.abs()
        } else {
            1.0
        };
        let (h, l) = (high_slope / scale, low_slope / scale);
        let tol = self.flat_tolerance;

        let (pattern_type, confidence) = if h.abs() < tol && l > tol {
            (PatternType::AscendingTriangle, DIRECTIONAL_TRIANGLE_CONFIDENCE)
        } else if h < -tol && l.abs() < tol {
            (PatternType::DescendingTriangle, DIRECTIONAL_TRIANGLE_CONFIDENCE)
        } else if (h + l).abs() < 2.0 * tol {
            (PatternType::SymmetricalTriangle, SYMMETRICAL_TRIANGLE_CONFIDENCE)
        } else {
            return Ok(None);
        };

        let n = closes.len() as f64;
        let support = low_icpt + low_slope * n;
        let resistance = high_icpt + high_slope * n;
        Ok(Some(
            PatternMatch::new(pattern_type, confidence, 0, closes.len() - 1)
                .with_levels(support, resistance),
        ))
    }
}

// --- RSI divergence ---

pub struct DivergenceDetector {
    pub rsi_window: usize,
}

impl DivergenceDetector {
    fn last_two(extrema: &[Extremum]) -> Option<(Extremum, Extremum)> {
        match extrema {
            [.., a, b] => Some((*a, *b)),
            _ => None,
        }
    }
}

impl PatternDetector for DivergenceDetector {
    fn name(&self) -> &'static str {
        "rsi_divergence"
    }

    fn detect(&self, closes: &[f64]) -> Result<Option<PatternMatch>, AnalysisError> {
        ensure_finite(closes)?;

        let rsi = rsi_series(closes, self.rsi_window);
        let Some(offset) = rsi.iter().position(Option::is_some) else {
            return Ok(None);
        };
        let rsi_values: Vec<f64> = rsi[offset..].iter().map(|v| v.unwrap_or(50.0)).collect();
        let shift = |e: Extremum| Extremum {
            index: e.index + offset,
            value: e.value,
        };
        let covered = |e: &Extremum| e.index >= offset;

        let price_troughs: Vec<Extremum> =
            find_troughs(closes).into_iter().filter(covered).collect();
        let price_peaks: Vec<Extremum> = find_peaks(closes).into_iter().filter(covered).collect();
        let rsi_troughs: Vec<Extremum> = find_troughs(&rsi_values).into_iter().map(shift).collect();
        let rsi_peaks: Vec<Extremum> = find_peaks(&rsi_values).into_iter().map(shift).collect();

        let bullish = Self::last_two(&price_troughs)
            .zip(Self::last_two(&rsi_troughs))
            .filter(|((p1, p2), (r1, r2))| p2.value < p1.value && r2.value > r1.value)
            .map(|((p1, p2), _)| (PatternType::BullishDivergence, p1, p2));

        let bearish = Self::last_two(&price_peaks)
            .zip(Self::last_two(&rsi_peaks))
            .filter(|((p1, p2), (r1, r2))| p2.value > p1.value && r2.value < r1.value)
            .map(|((p1, p2), _)| (PatternType::BearishDivergence, p1, p2));

        // When both fire, report the one that completed most recently.
        let chosen = match (bullish, bearish) {
            (Some(bull), Some(bear)) => Some(if bear.2.index > bull.2.index { bear } else { bull }),
            (bull, bear) => bull.or(bear),
        };

        Ok(chosen.map(|(pattern_type, p1, p2)| {
            PatternMatch::new(pattern_type, DIVERGENCE_CONFIDENCE, p1.index, p2.index)
                .with_levels(p1.value.min(p2.value), p1.value.max(p2.value))
        }))
    }
}

// --- Scanner ---

/// Runs a set of detectors and collects whatever they find.
pub struct PatternScanner {
    detectors: Vec<Box<dyn PatternDetector>>,
}

impl PatternScanner {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// Head-and-shoulders, double top/bottom and triangle detectors, plus RSI
    /// divergence when enabled.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let mut scanner = Self::new()
            .with_detector(HeadAndShouldersDetector {
                min_bars: config.pattern_min_bars,
                shoulder_tolerance: config.shoulder_tolerance,
            })
            .with_detector(DoubleTopBottomDetector {
                min_bars: config.pattern_min_bars,
                tolerance: config.double_tolerance,
            })
            .with_detector(TriangleDetector {
                min_bars: config.pattern_min_bars,
                radius: config.extrema_radius,
                flat_tolerance: config.triangle_flat_tolerance,
                normalize_slopes: config.normalize_triangle_slopes,
            });
        if config.divergence_enabled {
            scanner = scanner.with_detector(DivergenceDetector {
                rsi_window: config.rsi_window,
            });
        }
        scanner
    }

    pub fn with_detector<D: PatternDetector + 'static>(mut self, detector: D) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// A failing detector counts as "pattern absent".
    pub fn scan(&self, closes: &[f64]) -> Vec<PatternMatch> {
        self.detectors
            .iter()
            .filter_map(|detector| match detector.detect(closes) {
                Ok(found) => found,
                Err(e) => {
                    debug!(detector = detector.name(), error = %e, "pattern detector failed");
                    None
                }
            })
            .collect()
    }
}

impl Default for PatternScanner {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}
