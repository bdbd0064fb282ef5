//! Daemon lifecycle management.

use anyhow::{Context, Result};
use folio_core::{ContentConfig, ContentService, ReloadEvent, WatchCoordinator};
use folio_indexer::{CancellationToken, FileWatcher, WatcherOptions};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::signals;

/// The development runner
pub struct Daemon {
    config: ContentConfig,
    shutdown_tx: broadcast::Sender<()>,
    /// Subscribed at construction so early shutdown requests are not lost
    shutdown_rx: broadcast::Receiver<()>,
}

impl Daemon {
    pub fn new(config: ContentConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self {
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Sender that stops a running daemon.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Ingest, then watch until a signal or shutdown request arrives.
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            content_dir = %self.config.content_dir.display(),
            watch = self.config.watch,
            "Daemon starting"
        );

        let service = ContentService::open(&self.config)
            .await
            .context("Failed to open content service")?;

        // Signals cancel the token; ingestion and the coordinator observe it.
        let cancel = CancellationToken::new();
        let signal_task = {
            let cancel = cancel.clone();
            let shutdown_rx = self.shutdown_rx;
            tokio::spawn(async move {
                let reason = signals::wait_for_shutdown(shutdown_rx).await;
                tracing::info!(reason = %reason, "Shutdown signal received");
                cancel.cancel();
            })
        };
        let reload_task = spawn_reload_logger(service.subscribe());

        let shutdown_rx = self.shutdown_tx.subscribe();
        let result = Self::serve(&self.config, &service, shutdown_rx, &cancel).await;

        signal_task.abort();
        reload_task.abort();
        tracing::info!(stored = service.store().len(), "Daemon stopped");
        result
    }

    async fn serve(
        config: &ContentConfig,
        service: &ContentService,
        shutdown_rx: broadcast::Receiver<()>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Watch before the initial walk so edits made during it are seen.
        let watcher = if config.watch {
            let mut watcher = FileWatcher::new(WatcherOptions::default());
            watcher
                .watch(&config.content_dir)
                .context("Failed to watch content directory")?;
            Some(watcher)
        } else {
            None
        };

        match service.ingest_all(cancel).await {
            Ok(report) => {
                for (path, reason) in &report.failed {
                    tracing::warn!(path = %path, reason = %reason, "Document skipped");
                }
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!("Initial ingestion interrupted");
                return Ok(());
            }
            Err(e) => return Err(e).context("Initial ingestion failed"),
        }

        let Some(watcher) = watcher else {
            cancel.cancelled().await;
            return Ok(());
        };

        WatchCoordinator::new(service.clone(), config.debounce())
            .run(watcher, shutdown_rx, cancel.clone())
            .await
            .context("Watch coordinator stopped")
    }
}

fn spawn_reload_logger(mut events: broadcast::Receiver<ReloadEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    tracing::info!(
                        generation = event.generation,
                        updated = ?event.updated,
                        removed = ?event.removed,
                        "Content reloaded"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Reload log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
