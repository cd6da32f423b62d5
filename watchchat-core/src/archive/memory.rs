//! In-memory object store for tests and offline use.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::store::{ArchiveConnector, ObjectStore};

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, String>,
    fail_puts: Vec<String>,
    fail_all: bool,
}

/// Object store backed by a map. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<String>) {
        self.lock().objects.insert(key.into(), body.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Make every later `put_object` for `key` fail.
    pub fn fail_puts_to(&self, key: impl Into<String>) {
        self.lock().fail_puts.push(key.into());
    }

    /// Make every operation fail (an unreachable store).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().fail_all = unavailable;
    }

    fn check_available(inner: &Inner) -> Result<()> {
        if inner.fail_all {
            return Err(Error::RemoteArchive("object store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_keys(&self) -> Result<Vec<String>> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        Ok(inner.objects.keys().cloned().collect())
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        Ok(inner.objects.get(key).cloned())
    }

    async fn put_object(&self, key: &str, body: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        if inner.fail_puts.iter().any(|k| k == key) {
            return Err(Error::RemoteArchive(format!("put {} rejected", key)));
        }
        inner.objects.insert(key.to_string(), body.to_string());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        inner.objects.remove(key);
        Ok(())
    }
}

/// Connector that always hands out the same [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ArchiveConnector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn ObjectStore>> {
        Ok(Arc::new(self.store.clone()))
    }
}

/// Connector whose credential fetch always fails.
#[derive(Debug, Clone)]
pub struct UnavailableConnector {
    reason: String,
}

impl UnavailableConnector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ArchiveConnector for UnavailableConnector {
    async fn connect(&self) -> Result<Arc<dyn ObjectStore>> {
        Err(Error::Credential(self.reason.clone()))
    }
}
