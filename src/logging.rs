use std::sync::Once;

use tracing::info;
use tracing_subscriber::EnvFilter;

static INIT_TRACING: Once = Once::new();

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Install the global fmt subscriber once. Later calls are no-ops, and an
/// already-installed subscriber (e.g. from a test harness) is left alone.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        info!("bulk-dl tracing initialized");
    });
}
