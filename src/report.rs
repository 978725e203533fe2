use chrono::{DateTime, Utc};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

use crate::trend::{Signal, Trend, TrendAnalysis};

fn trend_color(trend: Trend) -> Color {
    match trend {
        Trend::Bullish => Color::Green,
        Trend::Bearish => Color::Red,
        Trend::Sideways => Color::Yellow,
        Trend::Unknown => Color::DarkGrey,
    }
}

fn signal_color(signal: Signal) -> Color {
    match signal {
        Signal::Buy => Color::Green,
        Signal::Sell => Color::Red,
        Signal::Hold => Color::Grey,
    }
}

/// Brightness scaled by confidence, never dimmer than 40%.
fn visibility_ratio(confidence: f64) -> f64 {
    (0.4 + 0.6 * confidence).clamp(0.4, 1.0)
}

fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}", v))
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%d-%m-%Y %H:%M:%S").to_string()
}

/// One row per symbol, followed by each symbol's narrative.
pub fn render(results: &[(String, TrendAnalysis)], generated_at: DateTime<Utc>) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Symbol").add_attribute(Attribute::Bold),
            Cell::new("Price")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Change (%)")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Trend").add_attribute(Attribute::Bold),
            Cell::new("Signal").add_attribute(Attribute::Bold),
            Cell::new("Confidence")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("RSI")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Support / Resistance").add_attribute(Attribute::Bold),
            Cell::new("Patterns").add_attribute(Attribute::Bold),
        ]);

    for (symbol, analysis) in results {
        let shade = (255.0 * visibility_ratio(analysis.confidence)) as u8;

        let patterns = if analysis.patterns.is_empty() {
            "-".to_string()
        } else {
            analysis
                .patterns
                .iter()
                .map(|p| p.pattern_type.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let levels = format!(
            "{} / {}",
            format_optional(analysis.support_resistance.support),
            format_optional(analysis.support_resistance.resistance)
        );

        table.add_row(vec![
            Cell::new(symbol).fg(Color::Rgb {
                r: 0,
                g: shade,
                b: shade,
            }),
            Cell::new(format!("{:.2}", analysis.latest_price)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:+.2}", analysis.price_change_percent))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} ({})", analysis.trend, analysis.trend_strength))
                .fg(trend_color(analysis.trend)),
            Cell::new(analysis.signal).fg(signal_color(analysis.signal)),
            Cell::new(format!("{:.0}%", analysis.confidence * 100.0))
                .set_alignment(CellAlignment::Right),
            Cell::new(format_optional(analysis.indicators.rsi_14))
                .set_alignment(CellAlignment::Right),
            Cell::new(levels),
            Cell::new(patterns),
        ]);
    }

    let mut out = format!(
        "(Analysis generated at {} UTC)\n{}\n",
        format_timestamp(generated_at),
        table
    );
    for (symbol, analysis) in results {
        out.push_str(&format!("\n{}: {}\n", symbol, analysis.analysis));
    }
    out
}
