//! Log segment catalog and CSV export for PD-Logger.
//!
//! The acquisition side writes measurement rows into rotated segment files
//! named `<prefix>_<digits>.<ext>`. This crate reads them back:
//!
//! # Features
//!
//! - [`LogStorage`] abstraction with a directory backend and an in-memory
//!   backend for tests
//! - [`Catalog`] of segments ordered by their numeric index
//! - [`LogExporter`] streaming all segments as one CSV document, optionally
//!   limited to a time window
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pdlogger_store::{Catalog, DirLogStorage, ExportMode, LogExporter, DEFAULT_MAX_SEGMENTS};
//!
//! # async fn example() -> pdlogger_store::Result<()> {
//! let storage = Arc::new(DirLogStorage::open_default()?);
//! let catalog = Catalog::build(storage.as_ref(), DEFAULT_MAX_SEGMENTS).await?;
//! let body = LogExporter::new(storage).stream(catalog, ExportMode::Full);
//! # drop(body);
//! # Ok(())
//! # }
//! ```

mod catalog;
mod error;
mod export;
mod storage;

pub use catalog::{Catalog, DEFAULT_MAX_SEGMENTS};
pub use error::{Error, Result};
pub use export::{DEFAULT_CHUNK_SIZE, ExportMode, ExportSummary, LogExporter, row_epoch};
pub use storage::{
    DirLogStorage, LOG_NAMESPACE, LogStorage, MemoryLogStorage, SegmentReader, StorageEntry,
    base_name, resolve_id,
};

/// Default log directory following platform conventions.
///
/// - Linux: `~/.local/share/pd-logger/logs`
/// - macOS: `~/Library/Application Support/pd-logger/logs`
/// - Windows: `C:\Users\<user>\AppData\Local\pd-logger\logs`
pub fn default_log_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("pd-logger")
        .join("logs")
}
