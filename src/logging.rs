//! Tracing subscriber setup shared by the relay, host and client roles.
//!
//! Everything is written to stderr: the client owns stdout for relayed
//! terminal output.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when nothing else is configured.
const DEFAULT_FILTER: &str = "shell_relay=info";

/// Turn a configured level into a filter directive.
///
/// A bare level such as `debug` is scoped to this crate; anything with `=`
/// or `,` is taken as a full directive.
fn directive(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("shell_relay={}", level)
    }
}

fn install(filter: EnvFilter) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .try_init()
}

/// Install a subscriber filtered by `RUST_LOG`, or `shell_relay=info`.
///
/// Fails if a global subscriber is already set.
pub fn try_init() -> Result<(), TryInitError> {
    install(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
}

/// Install a subscriber for an explicit level or directive.
///
/// An unparseable directive falls back to the default filter.
pub fn init_with_filter(level: &str) -> Result<(), TryInitError> {
    install(EnvFilter::try_new(directive(level)).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
}
