//! Logging initialization
//!
//! Structured logging via `tracing`, directed to stderr so stdout stays free
//! for command output. Text format by default; JSON when requested via the
//! `GODEV_LOG_FORMAT` environment variable or the `format` argument. Filter
//! level comes from `GODEV_LOG`, falling back to `RUST_LOG`, falling back to
//! `info`.

use std::io;
use std::sync::Once;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the logging system. Safe to call more than once; subsequent
/// calls are no-ops.
pub fn init(format: Option<&str>) {
    INIT.call_once(|| {
        let filter = env_filter();
        let env_format = std::env::var("GODEV_LOG_FORMAT").ok();
        let effective = format.or(env_format.as_deref()).unwrap_or("text");

        match effective {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_target(true).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
        }
    });
}

fn env_filter() -> EnvFilter {
    if let Ok(filter) = std::env::var("GODEV_LOG") {
        return EnvFilter::new(filter);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
