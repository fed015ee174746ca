use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use super::{PersistentStore, StoreVisitor};
use crate::error::{Result, SyncError};

const EXTENSION: &str = "json";
const HASHED_PREFIX: &str = "sha256-";
/// Longest hex stem used verbatim; keeps names under the usual 255-byte limit.
const MAX_HEX_STEM: usize = 200;

/// On-disk form of one entry. The key is stored alongside the value so hashed
/// file names can still be listed.
#[derive(Serialize)]
struct DocumentRef<'a> {
    key: &'a str,
    value: &'a Value,
}

#[derive(Deserialize)]
struct Document {
    key: String,
    value: Value,
}

/// Directory-backed store: one JSON document per key.
///
/// File names are the hex-encoded key, so any key (deck names contain `::`,
/// spaces and slashes) maps to a portable name. Keys whose hex form would be
/// too long for the filesystem are named by their SHA-256 digest instead.
/// Writes land in a temp file that is renamed over the target, keeping
/// single-key writes atomic.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!("File store opened at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stem_for(key: &str) -> String {
        let stem = hex::encode(key.as_bytes());
        if stem.len() <= MAX_HEX_STEM {
            stem
        } else {
            format!("{}{}", HASHED_PREFIX, hex::encode(Sha256::digest(key.as_bytes())))
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", Self::stem_for(key), EXTENSION))
    }

    /// Reads the document at `path`; `None` if the file is gone.
    async fn read_document(path: &Path) -> Result<Option<Document>> {
        match fs::read(path).await {
            Ok(bytes) => {
                let document = serde_json::from_slice(&bytes).map_err(|e| {
                    SyncError::Store(format!("corrupt document {}: {}", path.display(), e))
                })?;
                Ok(Some(document))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Key stored at `path`, or `None` for files this store did not write.
    async fn key_for(path: &Path) -> Option<String> {
        if path.extension()?.to_str()? != EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;

        if stem.starts_with(HASHED_PREFIX) {
            return match Self::read_document(path).await {
                Ok(Some(document)) if Self::stem_for(&document.key) == stem => Some(document.key),
                Ok(_) => None,
                Err(e) => {
                    warn!("Skipping unreadable store entry {}: {}", path.display(), e);
                    None
                }
            };
        }

        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match Self::read_document(&self.path_for(key)).await? {
            Some(document) if document.key == key => Ok(Some(document.value)),
            Some(document) => Err(SyncError::Store(format!(
                "document for '{}' holds key '{}'",
                key, document.key
            ))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let target = self.path_for(key);
        let staging = target.with_extension("tmp");
        let bytes = serde_json::to_vec(&DocumentRef { key, value: &value })?;

        fs::write(&staging, bytes).await?;
        fs::rename(&staging, &target).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn iterate(&self, visitor: &mut StoreVisitor<'_>) -> Result<()> {
        let mut dir = fs::read_dir(&self.root).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let Some(key) = Self::key_for(&path).await else {
                continue;
            };

            match self.get(&key).await {
                Ok(Some(value)) => visitor(&key, &value),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable store entry {}: {}", path.display(), e),
            }
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut keys = Vec::new();

        while let Some(item) = dir.next_entry().await? {
            if let Some(key) = Self::key_for(&item.path()).await {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
