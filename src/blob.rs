//! Byte storage for original and signed PDFs.
//!
//! Keys are relative, `/`-separated paths such as
//! `documents/{id}/original.pdf` or `signed/{id}/{uuid}/signed-document.pdf`.

use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub type BlobResult<T> = Result<T, BlobError>;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("blob storage timed out during {0}")]
    Timeout(String),
    #[error("blob storage unavailable: {0}")]
    Unavailable(String),
}

#[rocket::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>) -> BlobResult<()>;

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>>;

    async fn delete(&self, key: &str) -> BlobResult<()>;

    async fn exists(&self, key: &str) -> BlobResult<bool>;
}

/// Rejects keys that could escape the storage root.
fn check_key(key: &str) -> BlobResult<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    let only_normal = Path::new(key).components().all(|c| matches!(c, Component::Normal(_)));
    if !only_normal {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Files under a base directory, one file per key.
#[derive(Clone, Debug)]
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub async fn new(base_path: impl Into<PathBuf>) -> BlobResult<Self> {
        let base_path = base_path.into();
        tokio::fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn key_to_path(&self, key: &str) -> BlobResult<PathBuf> {
        check_key(key)?;
        Ok(self.base_path.join(key))
    }
}

#[rocket::async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> BlobResult<()> {
        let path = self.key_to_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>> {
        let path = self.key_to_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound(key.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let path = self.key_to_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }
}

/// Blobs held in process memory. Can be switched into a failing mode where
/// every call reports the backend as unavailable.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: tokio::sync::RwLock<std::collections::BTreeMap<String, Vec<u8>>>,
    failing: std::sync::atomic::AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn keys(&self) -> Vec<String> {
        self.blobs.read().await.keys().cloned().collect()
    }

    fn check_available(&self, op: &str) -> BlobResult<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            Err(BlobError::Unavailable(op.to_string()))
        } else {
            Ok(())
        }
    }
}

#[rocket::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> BlobResult<()> {
        self.check_available("put")?;
        check_key(key)?;
        self.blobs.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>> {
        self.check_available("get")?;
        check_key(key)?;
        self.blobs.read().await.get(key).cloned().ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.check_available("delete")?;
        check_key(key)?;
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        self.check_available("exists")?;
        check_key(key)?;
        Ok(self.blobs.read().await.contains_key(key))
    }
}

/// Bounds every call on the inner store; an overrun becomes
/// [`BlobError::Timeout`].
pub struct TimeoutBlobs<B> {
    inner: B,
    limit: std::time::Duration,
}

impl<B: BlobStore> TimeoutBlobs<B> {
    pub fn new(inner: B, limit: std::time::Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T>(
        &self, op: &str, fut: impl std::future::Future<Output = BlobResult<T>> + Send,
    ) -> BlobResult<T> {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!("Blob {} exceeded {:?}", op, self.limit);
                Err(BlobError::Timeout(op.to_string()))
            }
        }
    }
}

#[rocket::async_trait]
impl<B: BlobStore> BlobStore for TimeoutBlobs<B> {
    async fn put(&self, key: &str, data: Vec<u8>) -> BlobResult<()> {
        self.bounded("put", self.inner.put(key, data)).await
    }

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>> {
        self.bounded("get", self.inner.get(key)).await
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.bounded("delete", self.inner.delete(key)).await
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        self.bounded("exists", self.inner.exists(key)).await
    }
}

#[rocket::async_trait]
impl<B: BlobStore + ?Sized> BlobStore for std::sync::Arc<B> {
    async fn put(&self, key: &str, data: Vec<u8>) -> BlobResult<()> {
        (**self).put(key, data).await
    }

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        (**self).delete(key).await
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        (**self).exists(key).await
    }
}
