//! Recording ingestion pipeline.
//!
//! Moves per-call recordings out of the decoder's staging directory into
//! the date-bucketed store and invokes the downstream hook for each one.
//!
//! ```text
//! staging/ (decoder output) → watcher → pipeline → files/YYYYMMDD/
//!                                          ↓
//!                                   downstream hook
//! ```

pub mod dedup;
pub mod filename;
pub mod pipeline;
pub mod watcher;

// Re-export key types
pub use dedup::DedupCache;
pub use filename::{parse_date_key, ParsedFilename};
pub use pipeline::{
    FileEvent, FileEventKind, FileIngestionPipeline, IngestOutcome, ScanSummary, SkipReason,
};
pub use watcher::WatchHandle;
