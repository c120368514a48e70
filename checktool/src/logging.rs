//! Diagnostic tracing for checktool.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Stdout is reserved
//! for the report so it can be piped or diffed across runs.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `checktool=debug` with `verbose`.
///
/// # Example
/// ```bash
/// RUST_LOG=checktool=debug checktool run --profile rocky9
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "checktool=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
