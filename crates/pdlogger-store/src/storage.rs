//! Log storage backends.
//!
//! Rotation, eviction and writing of segments belong to the acquisition side;
//! this module only exposes what the catalog and the exporter need:
//! enumeration, open-for-read, existence checks and a bulk clear.
//!
//! Segments are addressed by identifiers of the form `/logs/<file name>`.
//! [`resolve_id`] rejects anything outside that namespace so a request
//! parameter can never reach other files.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Namespace prefix every segment identifier starts with.
pub const LOG_NAMESPACE: &str = "/logs/";

/// Reader over the raw bytes of one segment.
pub type SegmentReader = Box<dyn AsyncRead + Send + Unpin>;

/// One entry returned by [`LogStorage::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    /// Segment identifier (`/logs/<file name>`).
    pub id: String,
    /// Size in bytes.
    pub size: u64,
}

impl StorageEntry {
    /// File name part of the identifier.
    pub fn base_name(&self) -> &str {
        base_name(&self.id)
    }
}

/// Storage that owns the rotated log segments.
#[async_trait]
pub trait LogStorage: Send + Sync {
    /// Enumerate all entries in storage order.
    async fn list(&self) -> Result<Vec<StorageEntry>>;

    /// Open a segment for reading.
    async fn open(&self, id: &str) -> Result<SegmentReader>;

    /// Check whether a segment exists.
    async fn exists(&self, id: &str) -> bool;

    /// Remove every segment.
    async fn clear(&self) -> Result<()>;
}

/// Final path component of an identifier.
pub fn base_name(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Validate an identifier and return its file name.
///
/// The identifier must start with [`LOG_NAMESPACE`] and name a plain file
/// directly inside it.
pub fn resolve_id(id: &str) -> Result<&str> {
    let name = id
        .strip_prefix(LOG_NAMESPACE)
        .ok_or_else(|| Error::Forbidden(id.to_string()))?;
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::Forbidden(id.to_string()));
    }
    Ok(name)
}

fn segment_id(name: &str) -> String {
    format!("{}{}", LOG_NAMESPACE, name)
}

// ==========================================================================
// Directory-backed storage
// ==========================================================================

/// Storage backed by a directory of segment files.
#[derive(Debug, Clone)]
pub struct DirLogStorage {
    root: PathBuf,
}

impl DirLogStorage {
    /// Open (and create if needed) a log directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            std::fs::create_dir_all(root).map_err(|e| Error::CreateDirectory {
                path: root.to_path_buf(),
                source: e,
            })?;
        }
        info!("Using log directory {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Open the default log directory.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_log_dir())
    }

    /// Root directory of this storage.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        Ok(self.root.join(resolve_id(id)?))
    }
}

#[async_trait]
impl LogStorage for DirLogStorage {
    async fn list(&self) -> Result<Vec<StorageEntry>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                debug!("Skipping non UTF-8 file name in {}", self.root.display());
                continue;
            };
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Failed to stat {}: {}", name, e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            entries.push(StorageEntry {
                id: segment_id(&name),
                size: metadata.len(),
            });
        }
        Ok(entries)
    }

    async fn open(&self, id: &str) -> Result<SegmentReader> {
        let path = self.path_for(id)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(id.to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn exists(&self, id: &str) -> bool {
        match self.path_for(id) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut failed = 0;
        for entry in self.list().await? {
            let path = match self.path_for(&entry.id) {
                Ok(path) => path,
                Err(e) => {
                    warn!("Cannot remove {}: {}", entry.id, e);
                    failed += 1;
                    continue;
                }
            };
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove {}: {}", path.display(), e);
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(Error::ClearFailed { failed });
        }
        info!("Cleared log directory {}", self.root.display());
        Ok(())
    }
}

// ==========================================================================
// In-memory storage
// ==========================================================================

#[derive(Debug, Clone)]
struct MemorySegment {
    name: String,
    contents: Vec<u8>,
    unreadable: bool,
}

/// In-memory storage (for testing and demos).
///
/// Entries are listed in insertion order.
#[derive(Debug, Default)]
pub struct MemoryLogStorage {
    segments: RwLock<Vec<MemorySegment>>,
}

impl MemoryLogStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a segment.
    pub fn insert(&self, name: &str, contents: impl Into<Vec<u8>>) {
        let mut segments = self.segments.write().unwrap_or_else(|e| e.into_inner());
        let contents = contents.into();
        if let Some(existing) = segments.iter_mut().find(|s| s.name == name) {
            existing.contents = contents;
            existing.unreadable = false;
        } else {
            segments.push(MemorySegment {
                name: name.to_string(),
                contents,
                unreadable: false,
            });
        }
    }

    /// Make a segment fail on open and survive [`LogStorage::clear`] while
    /// still being listed.
    pub fn mark_unreadable(&self, name: &str) {
        let mut segments = self.segments.write().unwrap_or_else(|e| e.into_inner());
        if let Some(segment) = segments.iter_mut().find(|s| s.name == name) {
            segment.unreadable = true;
        }
    }

    /// Number of stored segments.
    pub fn len(&self) -> usize {
        self.segments.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether storage holds no segments.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LogStorage for MemoryLogStorage {
    async fn list(&self) -> Result<Vec<StorageEntry>> {
        let segments = self.segments.read().unwrap_or_else(|e| e.into_inner());
        Ok(segments
            .iter()
            .map(|s| StorageEntry {
                id: segment_id(&s.name),
                size: s.contents.len() as u64,
            })
            .collect())
    }

    async fn open(&self, id: &str) -> Result<SegmentReader> {
        let name = resolve_id(id)?;
        let segments = self.segments.read().unwrap_or_else(|e| e.into_inner());
        let segment = segments
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if segment.unreadable {
            return Err(Error::Io(std::io::Error::other(format!(
                "segment {} is unreadable",
                id
            ))));
        }
        Ok(Box::new(Cursor::new(segment.contents.clone())))
    }

    async fn exists(&self, id: &str) -> bool {
        let Ok(name) = resolve_id(id) else {
            return false;
        };
        self.segments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|s| s.name == name)
    }

    async fn clear(&self) -> Result<()> {
        let mut segments = self.segments.write().unwrap_or_else(|e| e.into_inner());
        segments.retain(|s| s.unreadable);
        match segments.len() {
            0 => Ok(()),
            failed => Err(Error::ClearFailed { failed }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_all(mut reader: SegmentReader) -> String {
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out
    }

    #[test]
    fn test_resolve_id_accepts_namespace() {
        assert_eq!(resolve_id("/logs/log_0001.csv").unwrap(), "log_0001.csv");
    }

    #[test]
    fn test_resolve_id_rejects_escape() {
        assert!(matches!(resolve_id("/etc/passwd"), Err(Error::Forbidden(_))));
        assert!(matches!(resolve_id("logs/log_1.csv"), Err(Error::Forbidden(_))));
        assert!(matches!(resolve_id("/logs/../mqtt.json"), Err(Error::Forbidden(_))));
        assert!(matches!(resolve_id("/logs/.."), Err(Error::Forbidden(_))));
        assert!(matches!(resolve_id("/logs/"), Err(Error::Forbidden(_))));
        assert!(matches!(resolve_id("/logs/a\\b"), Err(Error::Forbidden(_))));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/logs/log_0001.csv"), "log_0001.csv");
        assert_eq!(base_name("log_0001.csv"), "log_0001.csv");
    }

    #[tokio::test]
    async fn test_memory_storage_roundtrip() {
        let storage = MemoryLogStorage::new();
        storage.insert("log_0001.csv", "epoch;bus_V;curr_mA\n1;2;3\n");
        storage.insert("log_0000.csv", "epoch;bus_V;curr_mA\n");

        let entries = storage.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "/logs/log_0001.csv");
        assert_eq!(entries[0].size, 26);
        assert_eq!(entries[1].base_name(), "log_0000.csv");

        let contents = read_all(storage.open("/logs/log_0001.csv").await.unwrap()).await;
        assert!(contents.ends_with("1;2;3\n"));
        assert!(storage.exists("/logs/log_0000.csv").await);
        assert!(!storage.exists("/logs/log_0009.csv").await);
    }

    #[tokio::test]
    async fn test_memory_storage_unreadable() {
        let storage = MemoryLogStorage::new();
        storage.insert("log_0001.csv", "x");
        storage.mark_unreadable("log_0001.csv");

        assert!(storage.exists("/logs/log_0001.csv").await);
        assert!(matches!(
            storage.open("/logs/log_0001.csv").await,
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_storage_open_missing() {
        let storage = MemoryLogStorage::new();
        assert!(matches!(
            storage.open("/logs/missing.csv").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_storage_clear() {
        let storage = MemoryLogStorage::new();
        storage.insert("log_0001.csv", "x");
        assert!(!storage.is_empty());
        storage.clear().await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_memory_storage_clear_keeps_unreadable() {
        let storage = MemoryLogStorage::new();
        storage.insert("log_0001.csv", "x");
        storage.insert("log_0002.csv", "y");
        storage.mark_unreadable("log_0002.csv");

        assert!(matches!(
            storage.clear().await,
            Err(Error::ClearFailed { failed: 1 })
        ));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_dir_storage_list_and_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("log_0002.csv"), "h\n2;5;1\n").unwrap();
        std::fs::create_dir(temp_dir.path().join("nested")).unwrap();

        let storage = DirLogStorage::open(temp_dir.path()).unwrap();
        let entries = storage.list().await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "/logs/log_0002.csv");
        assert_eq!(entries[0].size, 8);

        let contents = read_all(storage.open("/logs/log_0002.csv").await.unwrap()).await;
        assert_eq!(contents, "h\n2;5;1\n");
    }

    #[tokio::test]
    async fn test_dir_storage_open_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = DirLogStorage::open(temp_dir.path()).unwrap();

        assert!(matches!(
            storage.open("/logs/nope.csv").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            storage.open("/logs/../secret").await,
            Err(Error::Forbidden(_))
        ));
        assert!(!storage.exists("/logs/../secret").await);
    }

    #[tokio::test]
    async fn test_dir_storage_creates_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("data").join("logs");
        let storage = DirLogStorage::open(&root).unwrap();
        assert!(root.is_dir());
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dir_storage_clear() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("log_0000.csv"), "a").unwrap();
        std::fs::write(temp_dir.path().join("log_0001.csv"), "b").unwrap();

        let storage = DirLogStorage::open(temp_dir.path()).unwrap();
        storage.clear().await.unwrap();

        assert!(storage.list().await.unwrap().is_empty());
        assert!(storage.root().is_dir());
    }

    #[tokio::test]
    async fn test_dir_storage_clear_continues_past_rejected_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("log\\0000.csv"), "a").unwrap();
        std::fs::write(temp_dir.path().join("log_0001.csv"), "b").unwrap();
        std::fs::write(temp_dir.path().join("log_0002.csv"), "c").unwrap();

        let storage = DirLogStorage::open(temp_dir.path()).unwrap();
        assert!(matches!(
            storage.clear().await,
            Err(Error::ClearFailed { failed: 1 })
        ));

        let remaining = storage.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "/logs/log\\0000.csv");
    }
}
