use async_trait::async_trait;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AttachmentStoreError {
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// Metadata recorded on the owning post after a successful save.
#[derive(Debug, Clone)]
pub struct StoredAttachment {
    pub file_name: String, // original client filename
    pub file_path: String, // storage-relative name, unique per upload
    pub file_size: i64,
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn save(
        &self,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredAttachment, AttachmentStoreError>;
    async fn load(&self, stored_path: &str) -> Result<Vec<u8>, AttachmentStoreError>;
}

// ---------------- Local filesystem implementation ----------------

pub struct FsAttachmentStore {
    root: PathBuf,
}

impl FsAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Self {
        let root = std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".into());
        Self::new(root)
    }

    /// Strip any directory components the client smuggled into the name.
    fn sanitize(original_name: &str) -> String {
        let base = Path::new(original_name)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        if base.is_empty() || base == "." || base == ".." {
            "file".to_string()
        } else {
            base.to_string()
        }
    }
}

#[async_trait]
impl AttachmentStore for FsAttachmentStore {
    async fn save(
        &self,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredAttachment, AttachmentStoreError> {
        let file_name = Self::sanitize(original_name);
        let stored_name = format!("{}_{}", Uuid::new_v4(), file_name);
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AttachmentStoreError::Other(e.to_string()))?;
        let path = self.root.join(&stored_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AttachmentStoreError::Other(e.to_string()))?;
        info!("stored attachment '{}' ({} bytes)", path.display(), bytes.len());
        Ok(StoredAttachment {
            file_name,
            file_path: stored_name,
            file_size: bytes.len() as i64,
        })
    }

    async fn load(&self, stored_path: &str) -> Result<Vec<u8>, AttachmentStoreError> {
        // Stored names never contain separators; reject anything that does.
        if stored_path.contains('/') || stored_path.contains('\\') || stored_path.contains("..") {
            return Err(AttachmentStoreError::NotFound);
        }
        let path = self.root.join(stored_path);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AttachmentStoreError::NotFound)
            }
            Err(e) => Err(AttachmentStoreError::Other(e.to_string())),
        }
    }
}

/// Factory helper used in main.
pub fn build_attachment_store() -> Arc<dyn AttachmentStore> {
    Arc::new(FsAttachmentStore::from_env())
}
