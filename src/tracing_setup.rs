//! Subscriber setup for the scale reader.
//!
//! Everything the crate logs goes through `tracing` with structured fields
//! (`weight_kg`, `line`, `command`). [`init`] installs a `tracing-subscriber`
//! registry filtered by `RUST_LOG`, or by `application.log_level` when that
//! variable is unset. The `application` section also picks the output format,
//! ANSI colors and whether source locations are printed.
//!
//! ```no_run
//! use scale_daq::{config::ScaleConfig, tracing_setup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ScaleConfig::load()?;
//! tracing_setup::init(&config)?;
//! tracing::info!("Scale reader started");
//! # Ok(())
//! # }
//! ```

use crate::config::{ApplicationConfig, ScaleConfig};
use crate::error::{ScaleError, ScaleResult};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// Newline-delimited JSON
    Json,
}

/// Install the global subscriber described by `config.application`.
///
/// A subscriber that is already installed (another entry point or a test
/// harness got there first) is kept and this returns `Ok(())`.
pub fn init(config: &ScaleConfig) -> ScaleResult<()> {
    let app = &config.application;
    let level = parse_log_level(&app.log_level)?;
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let installed = tracing_subscriber::registry()
        .with(output_layer(app).with_filter(filter))
        .try_init();
    if let Err(e) = installed {
        tracing::debug!(error = %e, "Keeping the subscriber that is already installed");
    }
    Ok(())
}

fn output_layer(app: &ApplicationConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let source = app.log_source_location;
    match app.log_format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(app.log_ansi)
            .with_file(source)
            .with_line_number(source)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_ansi(app.log_ansi)
            .with_file(source)
            .with_line_number(source)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_file(source)
            .with_line_number(source)
            .boxed(),
    }
}

/// Parse `trace`..`error`, ignoring case.
pub fn parse_log_level(level: &str) -> ScaleResult<Level> {
    level.trim().parse::<Level>().map_err(|_| {
        ScaleError::Configuration(format!(
            "Invalid log_level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_log_level(" Warn ").unwrap(), Level::WARN);
        assert!(matches!(
            parse_log_level("loud"),
            Err(ScaleError::Configuration(_))
        ));
    }

    #[test]
    fn log_format_names() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(serde_json::to_string(&LogFormat::Compact).unwrap(), "\"compact\"");
        assert!(serde_json::from_str::<LogFormat>("\"xml\"").is_err());
    }

    #[test]
    fn init_keeps_an_installed_subscriber() {
        let mut config = ScaleConfig::default();
        config.application.log_level = "error".to_string();
        config.application.log_format = LogFormat::Compact;
        config.application.log_ansi = false;
        assert!(init(&config).is_ok());
        assert!(init(&config).is_ok());
    }

    #[test]
    fn init_rejects_unknown_level() {
        let mut config = ScaleConfig::default();
        config.application.log_level = "chatty".to_string();
        assert!(init(&config).is_err());
    }
}
