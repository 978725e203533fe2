//! OHLC bars and the validated series the analysis core works on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AnalysisError;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume: None,
        }
    }
}

/// An ordered run of bars with finite closes and strictly increasing
/// timestamps. At least two bars are always present.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    bars: Vec<Bar>,
    closes: Vec<f64>,
}

#[allow(clippy::len_without_is_empty)]
impl PriceSeries {
    /// Builds a series, dropping bars whose close is NaN or infinite.
    pub fn new(bars: Vec<Bar>) -> Result<Self, AnalysisError> {
        let total = bars.len();
        let bars: Vec<Bar> = bars.into_iter().filter(|b| b.close.is_finite()).collect();
        if bars.len() < total {
            debug!(dropped = total - bars.len(), "filtered bars with non-finite close");
        }

        if bars.len() < 2 {
            return Err(AnalysisError::InsufficientData {
                required: 2,
                actual: bars.len(),
            });
        }

        if let Some(index) = bars
            .windows(2)
            .position(|pair| pair[1].timestamp <= pair[0].timestamp)
        {
            return Err(AnalysisError::NonMonotonicTimestamps { index: index + 1 });
        }

        let closes = bars.iter().map(|b| b.close).collect();
        Ok(Self { bars, closes })
    }

    /// Convenience for callers that only hold closes; bars are spaced one
    /// minute apart starting at the Unix epoch.
    pub fn from_closes(closes: &[f64]) -> Result<Self, AnalysisError> {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let ts = DateTime::from_timestamp(i as i64 * 60, 0).unwrap_or_default();
                Bar::new(ts, close, close, close, close)
            })
            .collect();
        Self::new(bars)
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }

    pub fn closes(&self) -> &[f64] {
        &self.closes
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn last_close(&self) -> f64 {
        self.closes[self.closes.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_at(secs: i64, close: f64) -> Bar {
        let ts = DateTime::from_timestamp(secs, 0).unwrap();
        Bar::new(ts, close, close, close, close)
    }

    #[test]
    fn rejects_short_series() {
        let err = PriceSeries::new(vec![bar_at(0, 1.0)]).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::InsufficientData {
                required: 2,
                actual: 1
            }
        );
        assert!(PriceSeries::new(Vec::new()).is_err());
    }

    #[test]
    fn drops_non_finite_closes() {
        let series = PriceSeries::new(vec![
            bar_at(0, 1.0),
            bar_at(60, f64::NAN),
            bar_at(120, 2.0),
            bar_at(180, f64::INFINITY),
        ])
        .unwrap();
        assert_eq!(series.closes(), &[1.0, 2.0]);
        assert_eq!(series.last_close(), 2.0);
        assert_eq!(series.len(), 2);

        let bars = series.into_bars();
        assert_eq!(bars, vec![bar_at(0, 1.0), bar_at(120, 2.0)]);
    }

    #[test]
    fn rejects_out_of_order_timestamps() {
        let err = PriceSeries::new(vec![bar_at(0, 1.0), bar_at(60, 2.0), bar_at(60, 3.0)])
            .unwrap_err();
        assert_eq!(err, AnalysisError::NonMonotonicTimestamps { index: 2 });
    }

    #[test]
    fn bar_json_omits_missing_volume() {
        let json = serde_json::to_value(bar_at(0, 5.0)).unwrap();
        assert!(json.get("volume").is_none());
        let with_volume = serde_json::to_value(Bar {
            volume: Some(10.0),
            ..bar_at(0, 5.0)
        })
        .unwrap();
        assert_eq!(with_volume["volume"], 10.0);
    }
}
