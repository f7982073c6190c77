//! Development-time tracing.
//!
//! Tracing is diagnostics only: `RUST_LOG` controls it and it goes to
//! stderr. Messages meant for the user go through
//! [`Conversation::say`](crate::io::conversation::Conversation::say).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output is compact, on stderr.
///
/// ```bash
/// RUST_LOG=optiloop=debug optiloop run --prompt "..."
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
