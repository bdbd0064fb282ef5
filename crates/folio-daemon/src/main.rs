//! Folio Daemon
//!
//! Development runner: ingests the content tree, watches it for edits and
//! logs every reload until interrupted.

mod daemon;
mod signals;

use anyhow::Result;
use daemon::Daemon;
use folio_core::ContentConfig;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Config warnings are printed before the configured filter exists.
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt().with_target(false).finish(),
        ContentConfig::load,
    );

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting Folio daemon v{}", env!("CARGO_PKG_VERSION"));

    // Run async runtime
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(Daemon::new(config).run())
}
