//! What a plugin instance is handed at construction.

use std::path::PathBuf;
use std::sync::Arc;

use skylark_types::plugin::PluginManifest;

use crate::llm::box_provider::BoxLlmProvider;
use crate::storage::PluginDataStore;
use crate::storage::plugin_storage::{PluginDataStoreDyn, PluginStorage};
use crate::transport::box_transport::BoxTransport;

/// Shared services every plugin context is built from.
#[derive(Clone)]
pub struct PluginServices {
    store: Arc<dyn PluginDataStoreDyn>,
    pub transport: Arc<BoxTransport>,
    pub llm: Arc<BoxLlmProvider>,
    /// Persona prompt, for plugins that call the LLM themselves.
    pub system_prompt: String,
}

impl PluginServices {
    pub fn new<S: PluginDataStore + 'static>(
        store: Arc<S>,
        transport: Arc<BoxTransport>,
        llm: Arc<BoxLlmProvider>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn storage_for(&self, plugin: &str) -> PluginStorage {
        PluginStorage::from_shared(plugin, self.store.clone())
    }
}

/// Per-instance context: identity, settings and handles.
#[derive(Clone)]
pub struct PluginContext {
    pub name: String,
    /// The plugin's own directory, when it was discovered on disk.
    pub dir: Option<PathBuf>,
    pub manifest: PluginManifest,
    pub storage: PluginStorage,
    pub transport: Arc<BoxTransport>,
    pub llm: Arc<BoxLlmProvider>,
    pub system_prompt: String,
}

impl PluginContext {
    pub fn new(
        name: &str,
        dir: Option<PathBuf>,
        manifest: PluginManifest,
        services: &PluginServices,
    ) -> Self {
        Self {
            name: name.to_string(),
            dir,
            manifest,
            storage: services.storage_for(name),
            transport: services.transport.clone(),
            llm: services.llm.clone(),
            system_prompt: services.system_prompt.clone(),
        }
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}
