//! Plugin discovery from disk and the built-in plugin set.
//!
//! Layout: `<plugins.dir>/<name>/config.yaml`. The directory name is the
//! plugin name; [`BuiltinFactory`] maps it (case-insensitively) to one of
//! the compiled-in implementations.

pub mod keyact;
pub mod radar;
pub mod topics;

use std::path::{Path, PathBuf};

use skylark_core::plugin::{BoxPlugin, DiscoveredPlugin, PluginContext, PluginFactory, PluginSource};
use skylark_types::error::PluginError;
use skylark_types::plugin::PluginManifest;

pub use keyact::KeyActPlugin;
pub use radar::RadarPlugin;
pub use topics::TopicsPlugin;

const MANIFEST_FILES: [&str; 2] = ["config.yaml", "config.yml"];

/// Reads plugin manifests from a directory tree.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn manifest_path(dir: &Path) -> Option<PathBuf> {
        MANIFEST_FILES
            .iter()
            .map(|file| dir.join(file))
            .find(|path| path.is_file())
    }

    fn read_manifest(name: &str, path: &Path) -> Result<PluginManifest, PluginError> {
        let content = std::fs::read_to_string(path).map_err(|e| PluginError::Manifest {
            name: name.to_string(),
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        if content.trim().is_empty() {
            return Ok(PluginManifest::default());
        }
        serde_yaml_ng::from_str(&content).map_err(|e| PluginError::Manifest {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

impl PluginSource for DirectorySource {
    fn discover(&self) -> Result<Vec<DiscoveredPlugin>, PluginError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(dir = %self.root.display(), "plugin directory not found");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(PluginError::Manifest {
                    name: self.root.display().to_string(),
                    message: e.to_string(),
                });
            }
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let Some(path) = Self::manifest_path(&dir) else {
                continue;
            };
            match Self::read_manifest(&name, &path) {
                Ok(manifest) => found.push(DiscoveredPlugin {
                    name,
                    dir: Some(dir),
                    manifest,
                }),
                Err(e) => tracing::warn!(plugin = %name, error = %e, "skipping plugin"),
            }
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    fn load(&self, name: &str) -> Result<DiscoveredPlugin, PluginError> {
        let dir = self.root.join(name);
        let path =
            Self::manifest_path(&dir).ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        Ok(DiscoveredPlugin {
            name: name.to_string(),
            manifest: Self::read_manifest(name, &path)?,
            dir: Some(dir),
        })
    }
}

/// Instantiates the compiled-in plugins by name.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinFactory;

impl PluginFactory for BuiltinFactory {
    fn create(&self, ctx: PluginContext) -> Result<BoxPlugin, PluginError> {
        match ctx.name.to_lowercase().as_str() {
            "keyact" => Ok(BoxPlugin::new(KeyActPlugin::new(ctx))),
            "topics" => Ok(BoxPlugin::new(TopicsPlugin::new(ctx))),
            "radar" => Ok(BoxPlugin::new(RadarPlugin::new(ctx))),
            _ => Err(PluginError::NotFound(ctx.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PluginHarness;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn discovers_plugin_directories_with_manifests() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "topics/config.yaml", "enabled: true\npriority: 5\nprefix_template: \"about {topic}, \"\n");
        write(tmp.path(), "keyact/config.yml", "enabled: false\n");
        write(tmp.path(), "empty/config.yaml", "");
        write(tmp.path(), "broken/config.yaml", "enabled: [unclosed\n");
        write(tmp.path(), "nomanifest/readme.txt", "hi");

        let found = DirectorySource::new(tmp.path()).discover().unwrap();
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["empty", "keyact", "topics"]);

        let topics = &found[2];
        assert!(topics.manifest.enabled);
        assert_eq!(topics.manifest.priority, 5);
        assert_eq!(topics.manifest.str_setting("prefix_template"), Some("about {topic},"));
        assert!(!found[0].manifest.enabled);
    }

    #[test]
    fn missing_root_discovers_nothing() {
        let tmp = TempDir::new().unwrap();
        let source = DirectorySource::new(tmp.path().join("absent"));
        assert!(source.discover().unwrap().is_empty());
    }

    #[test]
    fn load_reports_missing_and_malformed_plugins() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "broken/config.yaml", "priority: [\n");
        let source = DirectorySource::new(tmp.path());

        assert!(matches!(source.load("ghost"), Err(PluginError::NotFound(_))));
        assert!(matches!(source.load("broken"), Err(PluginError::Manifest { .. })));
    }

    #[test]
    fn factory_builds_known_names_only() {
        let harness = PluginHarness::new();
        let factory = BuiltinFactory;
        assert!(factory.create(harness.context("KeyAct", json!({}), None)).is_ok());
        assert!(factory.create(harness.context("radar", json!({}), None)).is_ok());
        let err = factory
            .create(harness.context("weather", json!({}), None))
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::NotFound(name) if name == "weather"));
    }
}
