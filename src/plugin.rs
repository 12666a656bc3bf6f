//! Plugin definitions and how they are executed.
//!
//! A plugin is a directory holding a `plugin.toml` manifest: metadata,
//! the declared parameters and the command line to run. The core never
//! links plugin code; it hands the resolved configuration to a
//! [`PluginRunner`], by default [`CommandPluginRunner`] which runs the
//! entrypoint as a child process.
//!
//! ```toml
//! [plugin]
//! name = "DummyPlugin"
//! version = [0, 0, 1]
//! short_description = "A dummy plugin"
//! entrypoint = ["sh", "run.sh"]
//!
//! [[parameters]]
//! name = "the_number"
//! type = "integer"
//! mandatory = true
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::ResultType;
use crate::parameters::{ConfigRecord, Parameter, ParameterDictionary};
use crate::template::{references, Interpolation};
use crate::user::UserInfo;

/// Manifest file name inside a plugin directory.
pub const MANIFEST_FILE: &str = "plugin.toml";

/// Width used when rendering help and saved configurations.
pub const TEXT_WIDTH: usize = 80;

#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub plugin: PluginMeta,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

/// The `[plugin]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginMeta {
    pub name: String,
    #[serde(default)]
    pub version: [u32; 3],
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub long_description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Command line, relative to the plugin directory.
    #[serde(default)]
    pub entrypoint: Vec<String>,
    /// Parameter that receives the user output directory when unset.
    #[serde(default)]
    pub output_dir_parameter: Option<String>,
}

impl PluginMeta {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: [0, 0, 0],
            short_description: String::new(),
            long_description: String::new(),
            category: String::new(),
            tags: Vec::new(),
            entrypoint: Vec::new(),
            output_dir_parameter: None,
        }
    }
}

/// A loaded plugin.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub meta: PluginMeta,
    pub parameters: ParameterDictionary,
    /// Directory the manifest was read from.
    pub root: PathBuf,
    pub manifest_path: Option<PathBuf>,
}

impl Plugin {
    pub fn new(meta: PluginMeta, parameters: ParameterDictionary, root: &Path) -> Self {
        Self {
            meta,
            parameters,
            root: root.to_path_buf(),
            manifest_path: None,
        }
    }

    /// Load from a plugin directory or a manifest file.
    pub fn load(path: &Path) -> Result<Plugin> {
        let manifest_path = if path.is_dir() {
            path.join(MANIFEST_FILE)
        } else {
            path.to_path_buf()
        };
        let content = std::fs::read_to_string(&manifest_path).map_err(|e| {
            Error::Configuration(format!(
                "cannot read plugin manifest {}: {}",
                manifest_path.display(),
                e
            ))
        })?;
        let root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut plugin = Plugin::from_manifest_str(&content, &root).map_err(|e| {
            Error::Configuration(format!("invalid plugin manifest {}: {}", manifest_path.display(), e))
        })?;
        plugin.manifest_path = Some(manifest_path);
        Ok(plugin)
    }

    pub fn from_manifest_str(content: &str, root: &Path) -> Result<Plugin> {
        let manifest: PluginManifest = toml::from_str(content)?;
        if manifest.plugin.name.trim().is_empty() {
            return Err(Error::Configuration("plugin name must not be empty".to_string()));
        }
        let parameters = ParameterDictionary::new(manifest.parameters)?;
        Ok(Plugin::new(manifest.plugin, parameters, root))
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// `major.minor.patch`
    pub fn version_string(&self) -> String {
        let [major, minor, patch] = self.meta.version;
        format!("{}.{}.{}", major, minor, patch)
    }

    /// Full help text: description followed by the parameter table.
    pub fn get_help(&self, width: usize) -> String {
        let description = if self.meta.long_description.is_empty() {
            &self.meta.short_description
        } else {
            &self.meta.long_description
        };
        format!(
            "{} (v{}): {}\nOptions:\n{}",
            self.name(),
            self.version_string(),
            description.trim(),
            self.parameters.get_help_string(width)
        )
    }

    /// The `[<name>]` configuration file for `record`.
    pub fn render_config(&self, record: &ConfigRecord) -> String {
        self.parameters.render_config(self.name(), record, TEXT_WIDTH)
    }

    /// Point the output directory parameter at `dir` when it is unset.
    pub fn fill_output_dir(&self, record: &mut ConfigRecord, dir: &Path) {
        let Some(name) = &self.meta.output_dir_parameter else {
            return;
        };
        if matches!(record.get(name), None | Some(Value::Null)) {
            record.insert(name.clone(), Value::String(dir.display().to_string()));
        }
    }

    /// Resolve `$VAR` references in string values.
    ///
    /// References may name other parameters of `record` or one of the
    /// [`SpecialVariables`]. Unknown references are left in place unless
    /// `check_cfg` is set, in which case they, like unset mandatory
    /// parameters, are a configuration error. Null values are dropped.
    pub fn setup_configuration(
        &self,
        record: &ConfigRecord,
        special: &SpecialVariables,
        check_cfg: bool,
    ) -> Result<ConfigRecord> {
        let scope: BTreeMap<String, String> = record
            .iter()
            .filter_map(|(k, v)| match v {
                Value::Null => None,
                Value::String(s) => Some((k.clone(), s.clone())),
                other => {
                    let formatted = self
                        .parameters
                        .get_parameter(k)
                        .map(|p| p.format(other))
                        .unwrap_or_else(|_| other.to_string());
                    Some((k.clone(), formatted))
                }
            })
            .collect();
        let fallback = |name: &str| special.lookup(name);

        if check_cfg {
            let missing: Vec<&str> = self
                .parameters
                .iter()
                .filter(|p| p.mandatory && !scope.contains_key(&p.name))
                .map(|p| p.name.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(Error::Configuration(format!(
                    "missing required configuration for: {}",
                    missing.join(", ")
                )));
            }
            for (key, raw) in &scope {
                if let Some(unknown) = references(raw)
                    .into_iter()
                    .find(|name| !scope.contains_key(name) && fallback(name.as_str()).is_none())
                {
                    return Err(Error::Configuration(format!(
                        "parameter '{}' references unknown variable '${}'",
                        key, unknown
                    )));
                }
            }
        }

        let mut interp = Interpolation::new(&scope, &fallback);
        let mut resolved = ConfigRecord::new();
        for (key, value) in record {
            let value = match value {
                Value::Null => continue,
                Value::String(_) => Value::String(interp.resolve(key)?),
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::String(s) => interp.expand(s).map(Value::String),
                            other => Ok(other.clone()),
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                other => other.clone(),
            };
            resolved.insert(key.clone(), value);
        }
        Ok(resolved)
    }
}

/// Values available to every plugin configuration as `$NAME`.
#[derive(Debug, Clone)]
pub struct SpecialVariables {
    pub user_base_dir: PathBuf,
    pub user_output_dir: PathBuf,
    pub user_plots_dir: PathBuf,
    pub user_cache_dir: PathBuf,
    pub now: DateTime<Utc>,
    pub uuid: uuid::Uuid,
}

impl SpecialVariables {
    pub const NAMES: [&'static str; 8] = [
        "USER_BASE_DIR",
        "USER_OUTPUT_DIR",
        "USER_PLOTS_DIR",
        "USER_CACHE_DIR",
        "SYSTEM_DATE",
        "SYSTEM_DATETIME",
        "SYSTEM_TIMESTAMP",
        "SYSTEM_RANDOM_UUID",
    ];

    pub fn new(user: &UserInfo, config: &Config, tool: &str) -> Self {
        Self {
            user_base_dir: user.base_dir(config),
            user_output_dir: user.output_dir(config, tool),
            user_plots_dir: user.plots_dir(config, tool),
            user_cache_dir: user.cache_dir(config, tool),
            now: Utc::now(),
            uuid: uuid::Uuid::new_v4(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<String> {
        let value = match name {
            "USER_BASE_DIR" => self.user_base_dir.display().to_string(),
            "USER_OUTPUT_DIR" => self.user_output_dir.display().to_string(),
            "USER_PLOTS_DIR" => self.user_plots_dir.display().to_string(),
            "USER_CACHE_DIR" => self.user_cache_dir.display().to_string(),
            "SYSTEM_DATE" => self.now.format("%Y%m%d").to_string(),
            "SYSTEM_DATETIME" => self.now.format("%Y%m%d_%H%M%S").to_string(),
            "SYSTEM_TIMESTAMP" => self.now.timestamp_millis().to_string(),
            "SYSTEM_RANDOM_UUID" => self.uuid.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

/// A file a run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub kind: ResultType,
    pub preview: Option<PathBuf>,
    pub caption: Option<String>,
}

impl OutputFile {
    pub fn new(path: PathBuf) -> Self {
        let kind = ResultType::from_path(&path);
        Self {
            path,
            kind,
            preview: None,
            caption: None,
        }
    }
}

/// Per-run information handed to a [`PluginRunner`].
#[derive(Debug, Clone)]
pub struct RunContext {
    pub user: UserInfo,
    pub row_id: i64,
    pub output_dir: PathBuf,
    pub plots_dir: PathBuf,
    pub cache_dir: PathBuf,
}

/// Executes a plugin with a resolved configuration.
#[async_trait]
pub trait PluginRunner: Send + Sync {
    async fn run(&self, plugin: &Plugin, config: &ConfigRecord, ctx: &RunContext) -> Result<Vec<OutputFile>>;
}

/// Runs the manifest entrypoint as a child process.
///
/// The configuration is written to stdin as a JSON object. Every stdout
/// line naming an existing file (or a directory, which contributes all
/// files below it) is an output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandPluginRunner;

impl CommandPluginRunner {
    fn program(plugin: &Plugin, program: &str) -> PathBuf {
        if program.starts_with("./") || program.starts_with("../") {
            plugin.root.join(program)
        } else {
            PathBuf::from(program)
        }
    }

    fn collect_outputs(plugin: &Plugin, stdout: &str) -> Vec<OutputFile> {
        let mut outputs = Vec::new();
        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let path = PathBuf::from(line);
            let path = if path.is_relative() {
                plugin.root.join(path)
            } else {
                path
            };
            if path.is_file() {
                outputs.push(OutputFile::new(path));
            } else if path.is_dir() {
                let mut files: Vec<PathBuf> = WalkDir::new(&path)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .map(|e| e.into_path())
                    .collect();
                files.sort();
                outputs.extend(files.into_iter().map(OutputFile::new));
            } else {
                debug!(line, "stdout line is not an output file");
            }
        }
        outputs
    }
}

#[async_trait]
impl PluginRunner for CommandPluginRunner {
    async fn run(&self, plugin: &Plugin, config: &ConfigRecord, ctx: &RunContext) -> Result<Vec<OutputFile>> {
        let failed = |reason: String| Error::PluginFailed {
            name: plugin.name().to_string(),
            reason,
        };
        let (program, args) = plugin
            .meta
            .entrypoint
            .split_first()
            .ok_or_else(|| failed("no entrypoint declared".to_string()))?;
        let program = CommandPluginRunner::program(plugin, program);

        let mut child = tokio::process::Command::new(&program)
            .args(args)
            .current_dir(&plugin.root)
            .env("FREVA_TOOL", plugin.name())
            .env("FREVA_VERSION", plugin.version_string())
            .env("FREVA_ROW_ID", ctx.row_id.to_string())
            .env("FREVA_USER", &ctx.user.name)
            .env("FREVA_OUTPUT_DIR", &ctx.output_dir)
            .env("FREVA_PLOTS_DIR", &ctx.plots_dir)
            .env("FREVA_CACHE_DIR", &ctx.cache_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failed(format!("cannot start {}: {}", program.display(), e)))?;

        let input = serde_json::to_string(config)?;
        if let Some(mut stdin) = child.stdin.take() {
            // The plugin may exit without reading its input.
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status.code().map_or("a signal".to_string(), |c| c.to_string()),
                stderr.trim()
            )));
        }

        let outputs = CommandPluginRunner::collect_outputs(plugin, &String::from_utf8_lossy(&output.stdout));
        info!(tool = plugin.name(), row_id = ctx.row_id, outputs = outputs.len(), "plugin finished");
        Ok(outputs)
    }
}
