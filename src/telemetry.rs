//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "slidesmith=info,tower_http=info";
const VERBOSE_FILTER: &str = "slidesmith=debug,tower_http=debug";

/// Install the global subscriber. Logs go to stderr.
///
/// `RUST_LOG` wins over `verbose` when set. Calling this twice is harmless;
/// the second call leaves the first subscriber in place.
pub fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER }));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}
