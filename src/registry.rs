//! Plugin discovery and lookup.
//!
//! Plugins come from two sources, in precedence order:
//!
//! ```text
//! [plugin:<name>] config sections  →  EVALUATION_SYSTEM_PLUGINS entries
//! ```
//!
//! A section names the plugin directory with `plugin_path`; an
//! environment entry is a `path,module` pair (pairs separated by `:`).
//! In both cases `module` may name the manifest file inside the
//! directory; otherwise `plugin.toml` is used. When two sources define
//! the same plugin name, the first one wins.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::plugin::{Plugin, MANIFEST_FILE};
use crate::suggest::similar_names;

/// Extra plugins as `path,module[:path,module]*`.
pub const PLUGINS_ENV: &str = "EVALUATION_SYSTEM_PLUGINS";

const UNKNOWN: &str = "unknown";

/// Origin URL and commit of the repository holding a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub repository: String,
    pub commit: String,
}

impl VersionInfo {
    pub fn unknown() -> Self {
        Self {
            repository: UNKNOWN.to_string(),
            commit: UNKNOWN.to_string(),
        }
    }
}

/// Query git for the origin URL and HEAD commit of `dir`.
///
/// Any failure yields `unknown` for the affected field.
pub async fn git_fingerprint(dir: &Path) -> VersionInfo {
    async fn git(dir: &Path, args: &[&str]) -> Option<String> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
    let (repository, commit) = tokio::join!(
        git(dir, &["config", "--get", "remote.origin.url"]),
        git(dir, &["rev-parse", "HEAD"]),
    );
    VersionInfo {
        repository: repository.unwrap_or_else(|| UNKNOWN.to_string()),
        commit: commit.unwrap_or_else(|| UNKNOWN.to_string()),
    }
}

/// Manifest path for a plugin directory and optional module name.
fn manifest_path(dir: &Path, module: Option<&str>) -> PathBuf {
    match module.map(str::trim).filter(|m| m.ends_with(".toml")) {
        Some(file) => dir.join(file),
        None => dir.join(MANIFEST_FILE),
    }
}

/// Parse an `EVALUATION_SYSTEM_PLUGINS` value into manifest paths.
pub fn parse_plugin_env(value: &str) -> Vec<PathBuf> {
    value
        .split(':')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(',') {
            Some((path, module)) => manifest_path(Path::new(path.trim()), Some(module)),
            None => manifest_path(Path::new(entry), None),
        })
        .collect()
}

/// All known plugins, keyed by lower-cased name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Plugin>,
    fingerprints: Mutex<HashMap<PathBuf, VersionInfo>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover plugins from `config` and an `EVALUATION_SYSTEM_PLUGINS`
    /// value. Plugins that fail to load are skipped with a warning.
    pub fn from_config(config: &Config, env_plugins: Option<&str>) -> Self {
        let mut registry = PluginRegistry::new();

        for (name, section) in config.plugin_sections() {
            let Some(dir) = section.get("plugin_path").filter(|p| !p.is_empty()) else {
                warn!(plugin = name, "plugin section has no plugin_path, skipping");
                continue;
            };
            let path = manifest_path(Path::new(dir), section.get("module"));
            registry.load_one(&path, &format!("[plugin:{}]", name));
        }

        if let Some(value) = env_plugins {
            for path in parse_plugin_env(value) {
                registry.load_one(&path, PLUGINS_ENV);
            }
        }
        debug!(count = registry.plugins.len(), "plugins discovered");
        registry
    }

    fn load_one(&mut self, path: &Path, source: &str) {
        match Plugin::load(path) {
            Ok(plugin) => {
                if !self.register(plugin) {
                    warn!(path = %path.display(), source, "plugin name already registered, skipping");
                }
            }
            Err(e) => warn!(path = %path.display(), source, error = %e, "cannot load plugin"),
        }
    }

    /// Add `plugin` unless its name is taken; returns whether it was added.
    pub fn register(&mut self, plugin: Plugin) -> bool {
        let key = plugin.name().to_lowercase();
        if self.plugins.contains_key(&key) {
            return false;
        }
        self.plugins.insert(key, plugin);
        true
    }

    /// Case-insensitive lookup.
    pub fn get_plugin(&self, name: &str) -> Result<&Plugin> {
        self.plugins
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::PluginNotFound {
                name: name.to_string(),
                suggestions: similar_names(
                    &name.to_lowercase(),
                    self.plugins.values().map(|p| p.name()),
                ),
            })
    }

    /// Plugins sorted by name.
    pub fn list(&self) -> Vec<&Plugin> {
        self.plugins.values().collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Repository and commit of `plugin`, cached per manifest.
    pub async fn version_info(&self, plugin: &Plugin) -> VersionInfo {
        let key = plugin
            .manifest_path
            .clone()
            .unwrap_or_else(|| plugin.root.clone());
        if let Some(info) = self.cached_fingerprint(&key) {
            return info;
        }
        let info = git_fingerprint(&plugin.root).await;
        let mut cache = match self.fingerprints.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.entry(key).or_insert(info).clone()
    }

    fn cached_fingerprint(&self, key: &Path) -> Option<VersionInfo> {
        let cache = match self.fingerprints.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.get(key).cloned()
    }
}
