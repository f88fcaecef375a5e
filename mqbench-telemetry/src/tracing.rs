use std::sync::Once;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initializes structured logging with log levels configurable via the
/// `RUST_LOG` environment variable.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mqbench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("tracing initialized");
}

/// Initializes tracing for tests.
///
/// Safe to call from every test; the subscriber is installed only once per
/// process and later calls are no-ops.
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "mqbench=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_is_idempotent() {
        init_test_tracing();
        init_test_tracing();

        info!("subscriber still installed after repeated initialization");
    }
}
