use std::sync::Once;

use tracing_subscriber::{prelude::*, EnvFilter};

fn do_init() {
    let filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));

    // Another subscriber may already be installed by an embedding program.
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .try_init();
}

/// Initialize tracing.
///
/// Will only initialize once, so tests may call this.
pub fn init() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(do_init);
}
