//! Process-wide `tracing` setup for the `checkerbox` binary.
//!
//! `RUST_LOG` takes precedence over the level handed to [`init_tracing`].
//! Everything is written to stderr; stdout carries notification lines and
//! site reports only.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber, as plain text or newline-delimited JSON.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let plain = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let structured = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
    });

    // A subscriber may already be installed (tests, repeated calls).
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .try_init();
}
