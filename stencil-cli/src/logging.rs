//! Tracing setup for the command-line tool

use tracing_subscriber::{
    Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Log to stderr, filtered by `RUST_LOG` (default `warn`), so rendered output
/// on stdout stays clean.
pub fn init_standard_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(filter),
        )
        .init();
}
