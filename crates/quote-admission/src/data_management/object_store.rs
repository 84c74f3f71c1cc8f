//! Object-store capability backing the slippage model cache.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{AdmissionError, Result};

/// Existence check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHead {
    pub exists: bool,
    /// `UNIX_EPOCH` when the object does not exist.
    pub last_modified: DateTime<Utc>,
}

impl ObjectHead {
    pub fn missing() -> Self {
        Self { exists: false, last_modified: DateTime::<Utc>::UNIX_EPOCH }
    }

    pub fn found(last_modified: DateTime<Utc>) -> Self {
        Self { exists: true, last_modified }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectContent {
    pub content: String,
    pub last_modified: DateTime<Utc>,
}

/// "Not found" is reported through [`ObjectHead::exists`]; every other
/// failure is an error.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead>;
    async fn fetch(&self, bucket: &str, key: &str) -> Result<ObjectContent>;
}

/// Object store held in memory, for tests and local runs.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), ObjectContent>>,
    unavailable: AtomicBool,
    fetches: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `content`, stamped with the current time.
    pub fn put(&self, bucket: &str, key: &str, content: impl Into<String>) {
        self.put_with_timestamp(bucket, key, content, Utc::now());
    }

    pub fn put_with_timestamp(
        &self,
        bucket: &str,
        key: &str,
        content: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) {
        self.objects.write().unwrap_or_else(|e| e.into_inner()).insert(
            (bucket.to_string(), key.to_string()),
            ObjectContent { content: content.into(), last_modified },
        );
    }

    pub fn remove(&self, bucket: &str, key: &str) {
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(bucket.to_string(), key.to_string()));
    }

    /// While set, every call fails as if the network were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AdmissionError::Store("object store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        self.check_available()?;
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(match objects.get(&(bucket.to_string(), key.to_string())) {
            Some(object) => ObjectHead::found(object.last_modified),
            None => ObjectHead::missing(),
        })
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<ObjectContent> {
        self.check_available()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| AdmissionError::Store(format!("object {}/{} not found", bucket, key)))
    }
}

/// Object store over a local directory: `<root>/<bucket>/<key>`, with the
/// file's modification time as `last_modified`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(key);
        if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(AdmissionError::Store(format!("invalid object path {}/{}", bucket, key)));
        }
        Ok(self.root.join(relative))
    }
}

fn store_error(path: &Path, err: std::io::Error) -> AdmissionError {
    AdmissionError::Store(format!("{}: {}", path.display(), err))
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                let modified = meta.modified().map_err(|e| store_error(&path, e))?;
                Ok(ObjectHead::found(modified.into()))
            }
            Ok(_) => Ok(ObjectHead::missing()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ObjectHead::missing()),
            Err(e) => Err(store_error(&path, e)),
        }
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<ObjectContent> {
        let path = self.object_path(bucket, key)?;
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| store_error(&path, e))?;
        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|meta| meta.modified())
            .map_err(|e| store_error(&path, e))?;
        Ok(ObjectContent { content, last_modified: modified.into() })
    }
}
