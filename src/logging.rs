//! Tracing bootstrap. Provider wire traffic and callback decisions are logged
//! at info level with full bodies; that log is the audit trail for
//! money-movement disputes.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    match config.format {
        LogFormat::Json => {
            fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(true)
                .init();
        }
        LogFormat::Plain => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}
