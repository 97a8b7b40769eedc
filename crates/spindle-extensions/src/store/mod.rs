//! Storage collaborator for extension records.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::record::Extension;

/// Persistent home of [`Extension`] records.
///
/// The host reads records through this trait and writes back error
/// counters and debug logs after loads and calls. The loader and the
/// documentation generator never touch it.
#[async_trait]
pub trait ExtensionStore: Send + Sync {
    /// Returns every stored extension ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the store cannot be read.
    async fn list(&self) -> Result<Vec<Extension>, StoreError>;

    /// Returns the extension with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    async fn get(&self, id: &str) -> Result<Extension, StoreError>;

    /// Replaces the stored record that has the same id as `extension`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such record exists.
    async fn update(&self, extension: Extension) -> Result<(), StoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryExtensionStore {
    records: Mutex<BTreeMap<String, Extension>>,
}

impl InMemoryExtensionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `extensions`.
    #[must_use]
    pub fn with_extensions(extensions: impl IntoIterator<Item = Extension>) -> Self {
        let store = Self::new();
        for extension in extensions {
            store.insert(extension);
        }
        store
    }

    /// Adds or replaces a record.
    pub fn insert(&self, extension: Extension) {
        self.records()
            .insert(extension.id().to_owned(), extension);
    }

    /// Removes a record, returning it.
    pub fn remove(&self, id: &str) -> Option<Extension> {
        self.records().remove(id)
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<String, Extension>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ExtensionStore for InMemoryExtensionStore {
    async fn list(&self) -> Result<Vec<Extension>, StoreError> {
        Ok(self.records().values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Extension, StoreError> {
        self.records()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })
    }

    async fn update(&self, extension: Extension) -> Result<(), StoreError> {
        let mut records = self.records();
        let Some(slot) = records.get_mut(extension.id()) else {
            return Err(StoreError::NotFound {
                id: extension.id().to_owned(),
            });
        };
        *slot = extension;
        Ok(())
    }
}
