//! Time-windowed duplicate suppression.
//!
//! One logical file write can surface as several filesystem notifications
//! (create + modify-name, or delivery to more than one handler). The cache
//! remembers recently seen paths for a short window so only the first
//! notification wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Set of recently seen file paths with a fixed expiry window
pub struct DedupCache {
    window: Duration,
    seen: Mutex<HashMap<PathBuf, Instant>>,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Sweep expired entries, then record `path`.
    ///
    /// Returns `true` if the path was not already present within the
    /// window. A hit does not refresh the entry, so a path becomes
    /// eligible again one window after it was first seen.
    pub fn check_and_insert(&self, path: &Path) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        seen.retain(|_, seen_at| now.duration_since(*seen_at) <= self.window);

        if seen.contains_key(path) {
            return false;
        }
        seen.insert(path.to_path_buf(), now);
        true
    }

    /// Number of live (unswept) entries
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
