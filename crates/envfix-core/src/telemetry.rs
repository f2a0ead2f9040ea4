//! Tracing initialisation shared by the envfix binaries.
//!
//! [`init_tracing`] installs the global subscriber once; later calls are
//! no-ops because the global default can only be set per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence for filtering; otherwise everything at
/// `level` and above is logged. With `json` set, lines come out as
/// newline-delimited JSON for log pipelines; the default is a human
/// format without target paths.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry.with(fmt::layer().with_target(false)).try_init().ok();
    }
}
