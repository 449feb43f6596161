//! Ordered catalog of rotated log segments.
//!
//! The catalog is rebuilt for every request: storage entries whose base name
//! matches `<prefix>_<digits>.<ext>` are collected (at most `max_segments`
//! of them, in storage order) and sorted by their numeric index. Sorting is
//! stable, so two segments sharing an index keep their enumeration order.

use std::fmt::Write as _;

use pdlogger_types::{LogSegmentDescriptor, parse_segment_index};
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{LogStorage, StorageEntry};

/// Default upper bound on cataloged segments per request.
pub const DEFAULT_MAX_SEGMENTS: usize = 64;

/// Ordered list of log segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    segments: Vec<LogSegmentDescriptor>,
    truncated: usize,
}

impl Catalog {
    /// Enumerate `storage` and build the catalog.
    pub async fn build(storage: &dyn LogStorage, max_segments: usize) -> Result<Self> {
        let entries = storage.list().await?;
        Ok(Self::from_entries(entries, max_segments))
    }

    /// Build a catalog from already enumerated entries.
    ///
    /// Entries beyond `max_segments` matching segments are dropped with a
    /// warning; foreign file names are skipped silently.
    pub fn from_entries<I>(entries: I, max_segments: usize) -> Self
    where
        I: IntoIterator<Item = StorageEntry>,
    {
        let mut segments = Vec::with_capacity(max_segments.min(DEFAULT_MAX_SEGMENTS));
        let mut truncated = 0;

        for entry in entries {
            let Some(index) = parse_segment_index(entry.base_name()) else {
                debug!("Skipping foreign file {}", entry.id);
                continue;
            };
            if segments.len() >= max_segments {
                truncated += 1;
                continue;
            }
            segments.push(LogSegmentDescriptor {
                index,
                id: entry.id,
                size: entry.size,
            });
        }

        if truncated > 0 {
            warn!(
                "Log catalog limited to {} segments, ignored {} more",
                max_segments, truncated
            );
        }

        segments.sort_by_key(|s| s.index);
        Self {
            segments,
            truncated,
        }
    }

    /// Cataloged segments in ascending index order.
    pub fn segments(&self) -> &[LogSegmentDescriptor] {
        &self.segments
    }

    /// Number of matching segments left out because of the bound.
    pub fn truncated(&self) -> usize {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total size of all cataloged segments in bytes.
    pub fn total_size(&self) -> u64 {
        self.segments.iter().map(|s| s.size).sum()
    }

    /// Render a plain-text description of the catalog.
    ///
    /// Every segment is listed with its position, index, identifier and size,
    /// followed by a fresh existence check against `storage`.
    pub async fn describe(&self, storage: &dyn LogStorage) -> String {
        let mut out = String::with_capacity(64 + self.segments.len() * 64);
        for (position, segment) in self.segments.iter().enumerate() {
            let exists = storage.exists(&segment.id).await;
            let _ = writeln!(
                out,
                "{}: idx={} path={} size={}",
                position, segment.index, segment.id, segment.size
            );
            let _ = writeln!(out, "  exists={}", exists);
            tokio::task::yield_now().await;
        }
        if self.truncated > 0 {
            let _ = writeln!(out, "truncated={}", self.truncated);
        }
        out
    }
}
