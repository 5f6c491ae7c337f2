//! File ingestion pipeline.
//!
//! Turns raw filesystem events into validated, date-bucketed files and
//! hands each newly moved file to the downstream hook exactly once. Lost
//! races (duplicate events, files already moved by another handler) and
//! unparseable names are skipped, never fatal.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::dedup::DedupCache;
use super::filename::parse_date_key;
use crate::config::IngestConfig;
use crate::hook::DownstreamHook;

/// Recording file suffix the pipeline cares about
pub const CAPTURE_SUFFIX: &str = "wav";

/// Why an event did not result in a move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Same path seen within the dedup window
    Duplicate,
    /// Source file vanished before the move; someone else got it
    Missing,
    /// Filename does not carry a valid date key
    BadFilename,
}

/// Outcome of one ingestion attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// File was moved into the store; `target` is its new location
    Ingested { target: PathBuf },
    Skipped(SkipReason),
}

impl IngestOutcome {
    pub fn is_ingested(&self) -> bool {
        matches!(self, Self::Ingested { .. })
    }
}

/// Kind of filesystem notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Moved,
}

/// One filesystem notification, consumed once
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

/// Counters from a startup scan of the staging directory
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanSummary {
    pub ingested: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Moves recordings from staging into the date-bucketed store
pub struct FileIngestionPipeline {
    staging_dir: PathBuf,
    store_dir: PathBuf,
    recursive: bool,
    dedup: DedupCache,
    hook: Arc<dyn DownstreamHook>,
}

impl FileIngestionPipeline {
    /// Create a pipeline with the default 2s dedup window, non-recursive
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        store_dir: impl Into<PathBuf>,
        hook: Arc<dyn DownstreamHook>,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            store_dir: store_dir.into(),
            recursive: false,
            dedup: DedupCache::new(Duration::from_secs(2)),
            hook,
        }
    }

    pub fn from_config(config: &IngestConfig, hook: Arc<dyn DownstreamHook>) -> Self {
        Self::new(&config.staging_dir, &config.store_dir, hook)
            .with_dedup_window(Duration::from_secs(config.dedup_window_secs))
            .with_recursive(config.recursive)
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup = DedupCache::new(window);
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    /// React to one filesystem event.
    ///
    /// Directory events and paths without the capture suffix are ignored.
    /// Ingestion errors are logged here; a bad event must not take down
    /// the event loop.
    pub async fn on_event(&self, event: FileEvent) {
        if !is_capture_file(&event.path) || event.path.is_dir() {
            return;
        }

        debug!(kind = ?event.kind, "new recording event: {}", event.path.display());

        if let Err(e) = self.ingest(&event.path).await {
            error!("failed to ingest {}: {e:#}", event.path.display());
        }
    }

    /// Validate, move, and hand off a single recording.
    ///
    /// `Err` is reserved for unexpected IO failures (store directory or
    /// move); every expected race or validation failure is a
    /// [`SkipReason`].
    pub async fn ingest(&self, path: &Path) -> Result<IngestOutcome> {
        self.ingest_inner(path, true).await
    }

    async fn ingest_inner(&self, path: &Path, emit_event: bool) -> Result<IngestOutcome> {
        if !self.dedup.check_and_insert(path) {
            debug!("skipping duplicate event for {}", path.display());
            return Ok(IngestOutcome::Skipped(SkipReason::Duplicate));
        }

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            debug!(
                "file no longer exists (likely already moved): {}",
                path.display()
            );
            return Ok(IngestOutcome::Skipped(SkipReason::Missing));
        }

        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            warn!("ignoring non-UTF-8 filename: {}", path.display());
            return Ok(IngestOutcome::Skipped(SkipReason::BadFilename));
        };

        let Some(date_key) = parse_date_key(filename) else {
            warn!("could not parse date from filename: {filename}");
            return Ok(IngestOutcome::Skipped(SkipReason::BadFilename));
        };

        let target_dir = self.store_dir.join(&date_key);
        tokio::fs::create_dir_all(&target_dir)
            .await
            .with_context(|| format!("failed to create {}", target_dir.display()))?;

        let target = target_dir.join(filename);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            warn!("file already exists at {}, overwriting", target.display());
        }

        move_file(path, &target).await?;
        info!("moved {} -> {}/", filename, target_dir.display());

        // The move already happened; a hook failure must not undo it
        if let Err(e) = self.hook.handle(&target, emit_event).await {
            error!("downstream hook failed for {}: {e:#}", target.display());
        }

        Ok(IngestOutcome::Ingested { target })
    }

    /// Organize recordings already sitting in the staging directory.
    ///
    /// Run before the live event loop so files that arrived while the
    /// pipeline was down are recovered. Backfilled files go to the hook
    /// with `emit_event` unset, so recovery does not replay alerts.
    pub async fn scan_existing(&self) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();

        if !tokio::fs::try_exists(&self.staging_dir).await.unwrap_or(false) {
            info!(
                "staging directory {} does not exist, nothing to scan",
                self.staging_dir.display()
            );
            return Ok(summary);
        }

        let files = self.collect_staged_files().await?;
        if files.is_empty() {
            info!("no existing recordings in {}", self.staging_dir.display());
            return Ok(summary);
        }

        info!(
            "found {} existing recordings in {}",
            files.len(),
            self.staging_dir.display()
        );

        for path in files {
            match self.ingest_inner(&path, false).await {
                Ok(outcome) if outcome.is_ingested() => summary.ingested += 1,
                Ok(_) => summary.skipped += 1,
                Err(e) => {
                    error!("failed to ingest {}: {e:#}", path.display());
                    summary.errors += 1;
                }
            }
        }

        info!(
            ingested = summary.ingested,
            skipped = summary.skipped,
            errors = summary.errors,
            "startup scan complete"
        );

        Ok(summary)
    }

    async fn collect_staged_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dirs = vec![self.staging_dir.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("failed to read {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(_) => continue,
                };

                if file_type.is_dir() {
                    if self.recursive {
                        dirs.push(path);
                    }
                } else if is_capture_file(&path) {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

/// True iff the path carries the capture file suffix
pub fn is_capture_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(CAPTURE_SUFFIX))
        .unwrap_or(false)
}

/// Move with rename, falling back to copy+remove across filesystems
async fn move_file(source: &Path, target: &Path) -> Result<()> {
    if tokio::fs::rename(source, target).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(source, target)
        .await
        .with_context(|| format!("failed to copy {} to {}", source.display(), target.display()))?;
    tokio::fs::remove_file(source)
        .await
        .with_context(|| format!("failed to remove {}", source.display()))?;
    Ok(())
}
