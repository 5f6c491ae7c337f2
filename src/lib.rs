//! callkeeper - DMR capture supervisor and recording organizer
//!
//! Keeps a dsd-fme RTL-SDR capture process alive and ingests the per-call
//! wav files it produces.
//!
//! # Architecture
//!
//! Two independent halves share nothing but the staging directory:
//!
//! - The [`supervisor`] owns the external decoder process and runs a
//!   watchdog loop that restarts it on crash, on a schedule, and when its
//!   log file goes stale (frozen process).
//! - The [`ingest`] pipeline watches the staging directory, deduplicates
//!   filesystem events, moves recordings into `files/YYYYMMDD/`, and
//!   invokes the downstream [`hook`] once per file.
//!
//! # Usage
//!
//! ```bash
//! # Supervise the decoder and ingest recordings until interrupted
//! callkeeper run
//!
//! # One-shot: organize files already in the staging directory
//! callkeeper scan
//!
//! # Validate config.yaml
//! callkeeper check-config
//! ```

pub mod cli;
pub mod config;
pub mod hook;
pub mod ingest;
pub mod supervisor;

// Re-export main types at crate root for convenience
pub use config::{Config, ConfigError, IngestConfig, RadioConfig, WatchdogConfig};
pub use hook::{DownstreamHook, NullHook, WebhookNotifier};
pub use ingest::{
    DedupCache, FileEvent, FileEventKind, FileIngestionPipeline, IngestOutcome, ParsedFilename,
    ScanSummary, SkipReason,
};
pub use supervisor::{
    LaunchSpec, ProcessStatus, ProcessSupervisor, SupervisorError, SupervisorOptions,
    WatchdogPolicy,
};
