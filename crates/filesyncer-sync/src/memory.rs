//! In-process object store
//!
//! [`MemoryObjectStore`] implements [`IObjectStore`] over a map held in
//! memory. It backs `storage.backend: memory` for local runs and doubles as
//! the store in pipeline tests, where its call counters and fault switches
//! are used to assert exactly which primitives ran.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::RwLock;

use filesyncer_core::domain::{ObjectMetadata, ObjectName};
use filesyncer_core::ports::IObjectStore;

/// An object held by [`MemoryObjectStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub metadata: ObjectMetadata,
}

/// Number of times each primitive was invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub exists: usize,
    pub put: usize,
    pub get: usize,
    pub delete: usize,
    pub list: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.exists + self.put + self.get + self.delete + self.list
    }
}

#[derive(Default)]
struct Counters {
    exists: AtomicUsize,
    put: AtomicUsize,
    get: AtomicUsize,
    delete: AtomicUsize,
    list: AtomicUsize,
}

/// [`IObjectStore`] kept entirely in memory
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<ObjectName, StoredObject>>,
    counters: Counters,
    failing: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency` before it touches the map
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes every subsequent call fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            exists: self.counters.exists.load(Ordering::SeqCst),
            put: self.counters.put.load(Ordering::SeqCst),
            get: self.counters.get.load(Ordering::SeqCst),
            delete: self.counters.delete.load(Ordering::SeqCst),
            list: self.counters.list.load(Ordering::SeqCst),
        }
    }

    /// Returns a copy of the stored object, bypassing the counters
    pub async fn object(&self, name: &str) -> Option<StoredObject> {
        let name = ObjectName::new(name).ok()?;
        self.objects.read().await.get(&name).cloned()
    }

    /// Stores an object directly, bypassing the counters
    pub async fn insert(&self, name: ObjectName, data: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(
            name,
            StoredObject {
                data: data.into(),
                metadata: ObjectMetadata::now("seed"),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    async fn enter(&self, counter: &AtomicUsize, operation: &str) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory store: injected failure in {operation}");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IObjectStore for MemoryObjectStore {
    async fn object_exists(&self, name: &ObjectName) -> Result<bool> {
        self.enter(&self.counters.exists, "exists").await?;
        Ok(self.objects.read().await.contains_key(name))
    }

    async fn put_object(
        &self,
        name: &ObjectName,
        source: &Path,
        metadata: &ObjectMetadata,
    ) -> Result<u64> {
        self.enter(&self.counters.put, "put").await?;
        let data = tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let size = data.len() as u64;
        self.objects.write().await.insert(
            name.clone(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        Ok(size)
    }

    async fn get_object(&self, name: &ObjectName, destination: &Path) -> Result<u64> {
        self.enter(&self.counters.get, "get").await?;
        let data = self
            .objects
            .read()
            .await
            .get(name)
            .map(|object| object.data.clone())
            .ok_or_else(|| anyhow!("object not found: {name}"))?;
        tokio::fs::write(destination, &data)
            .await
            .with_context(|| format!("Failed to write {}", destination.display()))?;
        Ok(data.len() as u64)
    }

    async fn delete_object(&self, name: &ObjectName) -> Result<()> {
        self.enter(&self.counters.delete, "delete").await?;
        self.objects
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| anyhow!("object not found: {name}"))
    }

    async fn list_objects(&self) -> Result<Vec<ObjectName>> {
        self.enter(&self.counters.list, "list").await?;
        Ok(self.objects.read().await.keys().cloned().collect())
    }
}
