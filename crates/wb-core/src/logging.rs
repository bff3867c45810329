//! Tracing setup for the `workbench` binary
//!
//! Libraries only emit events; the binary installs the subscriber once.

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber
///
/// `RUST_LOG` wins over `fallback`; an unparsable fallback becomes `info`.
/// Returns `false` if a subscriber was already installed.
pub fn init(fallback: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };
    if installed {
        tracing::debug!("tracing initialised (filter fallback {fallback:?})");
    }
    installed
}
