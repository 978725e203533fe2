use std::sync::Once;

use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

fn parse_level(level: &str) -> Level {
    match level.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Installs the global subscriber once. `RUST_LOG` directives are layered
/// on top of `level`.
pub fn init(level: &str, json: bool) {
    INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env().add_directive(parse_level(level).into());
        for noisy in ["hyper=warn", "reqwest=warn"] {
            if let Ok(directive) = noisy.parse() {
                filter = filter.add_directive(directive);
            }
        }

        let builder = tracing_subscriber::fmt()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_env_filter(filter);
        if json {
            builder.json().init();
        } else {
            builder.init();
        }

        tracing::debug!(log_level = %level, json, "logging initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_default_to_info() {
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("Debug"), Level::DEBUG);
        assert_eq!(parse_level("loud"), Level::INFO);
    }
}
