use crypto_trend_analyzer::AnalysisConfig;
use crypto_trend_analyzer::patterns::{
    HeadAndShouldersDetector, PatternDetector, PatternScanner, PatternType,
};

/// Three peaks with the given heights separated by troughs at 80.
fn three_peaks(left: f64, head: f64, right: f64) -> Vec<f64> {
    vec![80.0, left, 80.0, head, 80.0, right, 80.0]
}

/// A flat lead-in long enough for the scanner's minimum bar count.
fn after_flat_run(closes: Vec<f64>) -> Vec<f64> {
    let mut padded = vec![80.0; 14];
    padded.extend(closes);
    padded
}

#[test]
fn shoulders_two_percent_apart_match() {
    let detector = HeadAndShouldersDetector {
        min_bars: 0,
        shoulder_tolerance: AnalysisConfig::default().shoulder_tolerance,
    };
    let found = detector
        .detect(&three_peaks(100.0, 120.0, 102.0))
        .unwrap()
        .expect("head and shoulders");
    assert_eq!(found.pattern_type, PatternType::HeadAndShoulders);
    assert_eq!(found.support_level, Some(80.0));
    assert_eq!(found.resistance_level, Some(120.0));
}

#[test]
fn shoulders_fifteen_percent_apart_do_not_match() {
    let detector = HeadAndShouldersDetector {
        min_bars: 0,
        shoulder_tolerance: AnalysisConfig::default().shoulder_tolerance,
    };
    assert_eq!(detector.detect(&three_peaks(100.0, 120.0, 115.0)).unwrap(), None);
}

#[test]
fn scanner_reports_one_match_per_detector() {
    // two head-and-shoulders formations back to back; only the first is reported
    let mut closes = after_flat_run(three_peaks(100.0, 120.0, 102.0));
    closes.extend(three_peaks(100.0, 125.0, 101.0));
    let matches = PatternScanner::default().scan(&closes);

    let hs: Vec<_> = matches
        .iter()
        .filter(|m| m.pattern_type == PatternType::HeadAndShoulders)
        .collect();
    assert_eq!(hs.len(), 1);
    assert_eq!((hs[0].start_index, hs[0].end_index), (15, 19));

    let mut seen = std::collections::HashSet::new();
    for m in &matches {
        assert!(seen.insert(m.pattern_type), "duplicate {}", m.pattern_type);
    }
}

#[test]
fn scanner_ignores_series_shorter_than_min_bars() {
    let closes = three_peaks(100.0, 120.0, 102.0);
    assert!(PatternScanner::default().scan(&closes).is_empty());
}

#[test]
fn matches_serialise_with_type_key() {
    let matches = PatternScanner::default().scan(&after_flat_run(three_peaks(100.0, 120.0, 102.0)));
    let json = serde_json::to_value(&matches).unwrap();
    assert_eq!(json[0]["type"], "head_and_shoulders");
    assert_eq!(json[0]["confidence"], 0.8);
}
