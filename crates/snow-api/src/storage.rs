//! Write-only blob storage for post images.
//!
//! Objects are written under a local directory which the server exposes at
//! `/uploads`; the URL handed back is built from the configured public base.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, ServiceError};

pub struct ObjectStore {
    dir: PathBuf,
    public_base: String,
}

impl ObjectStore {
    /// Open the store, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>, public_base: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ServiceError::Storage(format!("cannot create {}: {}", dir.display(), e)))?;

        Ok(Self {
            dir,
            public_base: public_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `bytes` under a fresh name carrying the extension of
    /// `original_name` and return the object's public URL.
    pub async fn put(&self, original_name: &str, bytes: &[u8]) -> Result<String> {
        let name = object_name(original_name);
        let path = self.dir.join(&name);

        fs::write(&path, bytes)
            .await
            .map_err(|e| ServiceError::Storage(format!("cannot write {}: {}", name, e)))?;

        debug!("Stored object {} ({} bytes)", name, bytes.len());
        Ok(format!("{}/uploads/{}", self.public_base, name))
    }
}

/// Lowercased extension of a file name, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn object_name(original_name: &str) -> String {
    match extension_of(original_name) {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}
