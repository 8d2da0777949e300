//! PluginStorage -- a namespaced, type-erased handle onto [`PluginDataStore`].
//!
//! Plugins are trait objects, so the storage they hold cannot be generic.
//! Same blanket-impl pattern as `BoxLlmProvider`:
//! 1. Define an object-safe `PluginDataStoreDyn` trait with boxed futures
//! 2. Blanket-impl it for all `T: PluginDataStore`
//! 3. `PluginStorage` wraps `Arc<dyn PluginDataStoreDyn>` plus the plugin name

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use skylark_types::error::RepositoryError;

use super::PluginDataStore;

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Object-safe version of [`PluginDataStore`].
pub trait PluginDataStoreDyn: Send + Sync {
    fn get_boxed<'a>(&'a self, plugin: &'a str, key: &'a str) -> BoxFut<'a, Option<String>>;
    fn set_boxed<'a>(&'a self, plugin: &'a str, key: &'a str, value: &'a str) -> BoxFut<'a, ()>;
    fn delete_boxed<'a>(&'a self, plugin: &'a str, key: Option<&'a str>) -> BoxFut<'a, u64>;
    fn list_keys_boxed<'a>(&'a self, plugin: &'a str) -> BoxFut<'a, Vec<String>>;
}

impl<T: PluginDataStore> PluginDataStoreDyn for T {
    fn get_boxed<'a>(&'a self, plugin: &'a str, key: &'a str) -> BoxFut<'a, Option<String>> {
        Box::pin(self.get(plugin, key))
    }

    fn set_boxed<'a>(&'a self, plugin: &'a str, key: &'a str, value: &'a str) -> BoxFut<'a, ()> {
        Box::pin(self.set(plugin, key, value))
    }

    fn delete_boxed<'a>(&'a self, plugin: &'a str, key: Option<&'a str>) -> BoxFut<'a, u64> {
        Box::pin(self.delete(plugin, key))
    }

    fn list_keys_boxed<'a>(&'a self, plugin: &'a str) -> BoxFut<'a, Vec<String>> {
        Box::pin(self.list_keys(plugin))
    }
}

/// Storage handle scoped to one plugin's namespace.
#[derive(Clone)]
pub struct PluginStorage {
    plugin: String,
    inner: Arc<dyn PluginDataStoreDyn>,
}

impl PluginStorage {
    pub fn new<S: PluginDataStore + 'static>(plugin: impl Into<String>, store: Arc<S>) -> Self {
        Self {
            plugin: plugin.into(),
            inner: store,
        }
    }

    /// Build a handle over an already type-erased backend.
    pub fn from_shared(plugin: impl Into<String>, inner: Arc<dyn PluginDataStoreDyn>) -> Self {
        Self {
            plugin: plugin.into(),
            inner,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.plugin
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        self.inner.get_boxed(&self.plugin, key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        self.inner.set_boxed(&self.plugin, key, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, RepositoryError> {
        Ok(self.inner.delete_boxed(&self.plugin, Some(key)).await? > 0)
    }

    /// Remove every key in this namespace.
    pub async fn clear(&self) -> Result<u64, RepositoryError> {
        self.inner.delete_boxed(&self.plugin, None).await
    }

    pub async fn keys(&self) -> Result<Vec<String>, RepositoryError> {
        self.inner.list_keys_boxed(&self.plugin).await
    }
}

impl std::fmt::Debug for PluginStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginStorage")
            .field("plugin", &self.plugin)
            .finish()
    }
}
