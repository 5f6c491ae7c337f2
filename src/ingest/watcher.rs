//! Filesystem event source for the ingestion pipeline.
//!
//! A raw `notify` watcher on the staging directory feeds creation and
//! move-in events to the pipeline over a channel. Events are handled one
//! at a time; duplicate deliveries are the pipeline's dedup cache's
//! problem, not ours.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::pipeline::{FileEvent, FileEventKind, FileIngestionPipeline};

/// How often the blocking bridge wakes to check for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Handle to control the running watcher task
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Signal the watcher to stop and join it with a bounded timeout
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        if timeout(Duration::from_secs(5), self.task).await.is_err() {
            warn!("watcher did not stop in time, detaching");
        }
    }
}

/// Start watching the pipeline's staging directory.
///
/// The staging and store directories are created if absent, so the watch
/// never fails on a fresh deployment.
pub fn spawn(pipeline: Arc<FileIngestionPipeline>) -> Result<WatchHandle> {
    std::fs::create_dir_all(pipeline.staging_dir()).with_context(|| {
        format!(
            "failed to create staging directory {}",
            pipeline.staging_dir().display()
        )
    })?;
    std::fs::create_dir_all(pipeline.store_dir()).with_context(|| {
        format!(
            "failed to create store directory {}",
            pipeline.store_dir().display()
        )
    })?;

    let (stop_tx, stop_rx) = mpsc::channel(1);
    let task = tokio::spawn(async move {
        if let Err(e) = run_watcher(pipeline, stop_rx).await {
            error!("file watcher error: {e:#}");
        }
    });

    Ok(WatchHandle { stop_tx, task })
}

async fn run_watcher(
    pipeline: Arc<FileIngestionPipeline>,
    mut stop_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let watch_path = pipeline.staging_dir().to_path_buf();
    let mode = if pipeline.recursive() {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };

    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).context("failed to create watcher")?;
    watcher
        .watch(&watch_path, mode)
        .with_context(|| format!("failed to watch {}", watch_path.display()))?;

    info!("watching {} for new recordings", watch_path.display());

    // notify delivers on a blocking std channel; drain it off the runtime
    // so this task only ever awaits and never pins a worker thread
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let bridge = tokio::task::spawn_blocking(move || {
        // The watch dies with this thread
        let _watcher = watcher;
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(event) => {
                    if event_tx.blocking_send(event).is_err() {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if event_tx.is_closed() {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                info!("file watcher stopping");
                break;
            }
            received = event_rx.recv() => match received {
                Some(Ok(event)) => {
                    for file_event in translate(&event) {
                        pipeline.on_event(file_event).await;
                    }
                }
                Some(Err(e)) => {
                    warn!("watch error: {e}");
                }
                None => {
                    anyhow::bail!("watch channel disconnected");
                }
            },
        }
    }

    // Dropping our receiver unblocks the bridge within one poll interval
    drop(event_rx);
    let _ = bridge.await;

    Ok(())
}

/// Map a notify event onto pipeline events.
///
/// Creations report every path; a rename-into reports only its
/// destination (the last path for a tracked rename pair).
fn translate(event: &notify::Event) -> Vec<FileEvent> {
    match classify(&event.kind) {
        Some(FileEventKind::Created) => event
            .paths
            .iter()
            .cloned()
            .map(|path| FileEvent {
                path,
                kind: FileEventKind::Created,
            })
            .collect(),
        Some(FileEventKind::Moved) => dest_path(event)
            .map(|path| FileEvent {
                path,
                kind: FileEventKind::Moved,
            })
            .into_iter()
            .collect(),
        None => Vec::new(),
    }
}

fn classify(kind: &EventKind) -> Option<FileEventKind> {
    match kind {
        EventKind::Create(_) => Some(FileEventKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => {
            Some(FileEventKind::Moved)
        }
        _ => None,
    }
}

fn dest_path(event: &notify::Event) -> Option<PathBuf> {
    event.paths.last().cloned()
}
