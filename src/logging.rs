//! Tracing subscriber setup.
//!
//! Logs go to stderr so stdout stays free for the stdio binding. The filter
//! comes from `QUERYGATE_LOG`, then `RUST_LOG`, then the verbosity flag.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "QUERYGATE_LOG";

fn filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "querygate=debug" } else { "querygate=info" };
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
