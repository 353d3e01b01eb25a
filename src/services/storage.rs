use crate::errors::ServiceError;
use async_trait::async_trait;
use bytes::Bytes;
use std::{io::ErrorKind, path::PathBuf};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Persists files uploaded with cart lines and returns their public URL.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(&self, original_name: Option<&str>, content: Bytes)
        -> Result<String, ServiceError>;

    /// Deletes a file previously returned by `store`. Missing files are not an error.
    async fn remove(&self, url: &str) -> Result<(), ServiceError>;
}

/// Writes uploads into a local directory under random names.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    url_prefix: String,
    max_bytes: usize,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
            max_bytes,
        }
    }

    fn file_name(original_name: Option<&str>) -> String {
        let extension = original_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| {
                !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric())
            });
        match extension {
            Some(ext) => format!("{}.{}", Uuid::new_v4().simple(), ext),
            None => Uuid::new_v4().simple().to_string(),
        }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn store(
        &self,
        original_name: Option<&str>,
        content: Bytes,
    ) -> Result<String, ServiceError> {
        if content.is_empty() {
            return Err(ServiceError::ValidationError(
                "Uploaded file is empty".to_string(),
            ));
        }
        if content.len() > self.max_bytes {
            return Err(ServiceError::ValidationError(format!(
                "Uploaded file exceeds {} bytes",
                self.max_bytes
            )));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ServiceError::StorageError(format!("create {:?}: {e}", self.root)))?;

        let name = Self::file_name(original_name);
        let path = self.root.join(&name);
        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| ServiceError::StorageError(format!("write {:?}: {e}", path)))?;

        debug!(?path, "stored upload");
        Ok(format!("{}/{}", self.url_prefix, name))
    }

    #[instrument(skip(self))]
    async fn remove(&self, url: &str) -> Result<(), ServiceError> {
        let name = url
            .strip_prefix(self.url_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| {
                !name.is_empty()
                    && !name.starts_with('.')
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
            })
            .ok_or_else(|| ServiceError::ValidationError(format!("{url} is not a stored upload")))?;

        let path = self.root.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(?path, "removed upload");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServiceError::StorageError(format!("remove {:?}: {e}", path))),
        }
    }
}
