//! Persisted broker configuration document.
//!
//! The document is a small JSON file (`server`, `port`, `user`, `pass`)
//! shared by the web API, which reads and replaces it, and the connectivity
//! manager, which polls it for changes. Writes go to a sibling temp file
//! that is renamed over the existing document, so a concurrent reader sees
//! either the old or the new document, never a torn one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use pdlogger_types::BrokerConfigDocument;
use tracing::{debug, info, warn};

/// Errors raised by [`BrokerConfigStore`].
#[derive(Debug, thiserror::Error)]
pub enum BrokerStoreError {
    #[error("Broker config {0} does not exist")]
    Missing(PathBuf),
    #[error("Failed to read broker config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse broker config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to serialize broker config: {0}")]
    Serialize(serde_json::Error),
    #[error("Failed to write broker config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// File-backed store for the broker configuration document.
#[derive(Debug, Clone)]
pub struct BrokerConfigStore {
    path: PathBuf,
}

impl BrokerConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read and parse the document.
    pub fn load(&self) -> Result<BrokerConfigDocument, BrokerStoreError> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BrokerStoreError::Missing(self.path.clone()));
            }
            Err(e) => {
                return Err(BrokerStoreError::Read {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        serde_json::from_slice(&content).map_err(|e| BrokerStoreError::Parse {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Load the document for display.
    ///
    /// A missing document is created with defaults first. A document that
    /// fails to parse is reported as defaults without touching the file.
    pub fn load_or_init(&self) -> Result<BrokerConfigDocument, BrokerStoreError> {
        match self.load() {
            Ok(doc) => Ok(doc),
            Err(BrokerStoreError::Missing(_)) => {
                let doc = BrokerConfigDocument::default();
                self.save(&doc)?;
                info!("Created default broker config at {:?}", self.path);
                Ok(doc)
            }
            Err(BrokerStoreError::Parse { path, source }) => {
                warn!("Broker config {:?} is unreadable ({}), showing defaults", path, source);
                Ok(BrokerConfigDocument::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the document.
    pub fn save(&self, doc: &BrokerConfigDocument) -> Result<(), BrokerStoreError> {
        let content = serde_json::to_vec(doc).map_err(BrokerStoreError::Serialize)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| BrokerStoreError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let tmp = self.temp_path();
        std::fs::write(&tmp, content).map_err(|e| BrokerStoreError::Write {
            path: tmp.clone(),
            source: e,
        })?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(BrokerStoreError::Write {
                path: self.path.clone(),
                source: e,
            });
        }

        debug!("Saved broker config to {:?}", self.path);
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
