//! Log output for the `converge` binary.
//!
//! Run reports and batch reports are printed on stdout, so every log line,
//! human-readable or JSON, is written to stderr.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber for a `converge` process.
///
/// `RUST_LOG` takes precedence over `level`. With `json` set, each event is
/// one JSON object carrying the `converge.run` span fields (`run_id`,
/// `subject_id`). Only the first call installs anything.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
