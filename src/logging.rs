//! Tracing initialization.
//!
//! The log level is controlled via the `RUST_LOG` environment variable,
//! defaulting to `info`:
//!
//! ```bash
//! RUST_LOG=skua=debug cargo run
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber. Calling this more than once is a
/// no-op.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
