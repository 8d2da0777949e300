//! Active model selection.
//!
//! The configured model is the default. An operator override is validated
//! against the configured compatible set and persisted under
//! `control/model`, so it survives restarts.

use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{info, warn};

use skylark_types::error::RepositoryError;

use crate::storage::{CONTROL_NAMESPACE, PluginDataStore};

const MODEL_KEY: &str = "model";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model '{name}' is not in the configured set ({allowed})")]
    Unsupported { name: String, allowed: String },

    #[error("model name is empty")]
    Empty,

    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

pub struct ModelSelector<S> {
    store: Arc<S>,
    default: String,
    /// Compatible models; empty accepts any name.
    allowed: Vec<String>,
    current: RwLock<Option<String>>,
}

impl<S: PluginDataStore> ModelSelector<S> {
    pub fn new(store: Arc<S>, default: impl Into<String>, allowed: Vec<String>) -> Self {
        Self {
            store,
            default: default.into(),
            allowed,
            current: RwLock::new(None),
        }
    }

    /// The model requests should use right now.
    pub fn current(&self) -> String {
        self.override_model()
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn default_model(&self) -> &str {
        &self.default
    }

    pub fn override_model(&self) -> Option<String> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Apply a persisted override. An override no longer in the allowed set
    /// is ignored.
    pub async fn load(&self) {
        match self.store.get(CONTROL_NAMESPACE, MODEL_KEY).await {
            Ok(Some(name)) => match self.validate(&name) {
                Ok(name) => {
                    info!(model = %name, "applied model override");
                    self.replace(Some(name));
                }
                Err(e) => warn!(error = %e, "ignoring persisted model override"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read model override"),
        }
    }

    /// Switch to `name`. Returns the canonical spelling from the allowed set.
    pub async fn select(&self, name: &str) -> Result<String, ModelError> {
        let name = self.validate(name)?;
        self.store.set(CONTROL_NAMESPACE, MODEL_KEY, &name).await?;
        self.replace(Some(name.clone()));
        info!(model = %name, "model override set");
        Ok(name)
    }

    /// Drop the override and return to the configured default.
    pub async fn reset(&self) -> Result<(), ModelError> {
        self.store.delete(CONTROL_NAMESPACE, Some(MODEL_KEY)).await?;
        self.replace(None);
        info!(model = %self.default, "model override cleared");
        Ok(())
    }

    fn validate(&self, name: &str) -> Result<String, ModelError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ModelError::Empty);
        }
        if self.allowed.is_empty() {
            return Ok(name.to_string());
        }
        self.allowed
            .iter()
            .find(|m| m.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| ModelError::Unsupported {
                name: name.to_string(),
                allowed: self.allowed.join(", "),
            })
    }

    fn replace(&self, model: Option<String>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = model;
    }
}
