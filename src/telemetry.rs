//! Tracing initialization.

use std::str::FromStr;
use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "IDRESOLVE_LOG";

static INIT: Once = Once::new();

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?} (expected 'text' or 'json')")),
        }
    }
}

/// Install the global subscriber.
///
/// Reads `IDRESOLVE_LOG` for filter directives, e.g.
/// `IDRESOLVE_LOG=idresolve::engine=debug,idresolve=info`. Falls back to
/// `idresolve=info`. Calling it more than once is a no-op.
pub fn init_tracing(format: LogFormat) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("idresolve=info"));

        let registry = tracing_subscriber::registry().with(filter);
        match format {
            LogFormat::Text => registry
                .with(fmt::layer().with_target(true).with_thread_ids(true))
                .init(),
            LogFormat::Json => registry
                .with(fmt::layer().json().with_target(true).with_thread_ids(true))
                .init(),
        }
    });
}
