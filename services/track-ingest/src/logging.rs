//!
//! src/logging.rs  Oct 18th, 2026
//!
//! Initializes logger so the ingest batch and the fingerprint endpoint
//! give structured, informative output while running
//!
//!

use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tracing_error::ErrorLayer;
use tracing_appender::non_blocking;

use crate::config::{LogFormat, LoggingConfig};

/// Keeps the non-blocking writer flushing; drop only at exit
pub struct LoggingGuard(#[allow(dead_code)] tracing_appender::non_blocking::WorkerGuard);

fn filter_for(cfg: &LoggingConfig) -> EnvFilter {
    std::env::var("RUST_LOG")
        .ok()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(cfg.filter_directives.clone()))
}

pub fn init_logging(cfg: &LoggingConfig) ->
    Result<LoggingGuard, crate::errors::IngestError> {

    let (writer, guard) = non_blocking(std::io::stdout());
    let time = fmt::time::UtcTime::rfc_3339();

    let base = fmt::layer()
        .with_writer(writer)
        .with_timer(time)
        .with_ansi(cfg.with_ansi)
        .with_target(cfg.include_target)
        .with_file(cfg.include_file_line)
        .with_line_number(cfg.include_file_line);

    let registry = tracing_subscriber::registry()
        .with(filter_for(cfg))
        .with(ErrorLayer::default());

    let result = match cfg.format {
        LogFormat::Json => registry
            .with(base.json().flatten_event(true).with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(base.pretty())
            .try_init()
    };

    result.map_err(|e| crate::errors::IngestError::Config(
        format!("logger already installed: {e}")
    ))?;

    Ok( LoggingGuard(guard) )
}
