//! Sectioned INI configuration.
//!
//! The main section `[evaluation_system]` carries paths, database, index
//! and scheduler settings. `[scheduler_options]` (optionally overridden by
//! `[scheduler_options_<system>]`) feeds batch job construction, and every
//! `[plugin:<name>]` section points at a plugin directory.
//!
//! Values may reference other keys as `$key` or `${key}`; the lookup order
//! is the same section, then `[evaluation_system]`, then
//! `EVALUATION_SYSTEM_HOME`, then the process environment.
//!
//! Keys under `db.*` and `solr.*` can be provided by a vault service
//! ([`Config::resolve_secrets`]); a failing vault only becomes an error
//! when a missing secret is read.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::drs::DrsConfig;
use crate::error::{Error, Result};
use crate::scheduler::SchedulerSystem;
use crate::template::Interpolation;

pub const CONFIG_FILE_ENV: &str = "EVALUATION_SYSTEM_CONFIG_FILE";
pub const DRS_CONFIG_FILE_ENV: &str = "EVALUATION_SYSTEM_DRS_CONFIG_FILE";
pub const HOME_ENV: &str = "EVALUATION_SYSTEM_HOME";
pub const PUBKEY_ENV: &str = "PUBKEY";
pub const MAIN_SECTION: &str = "evaluation_system";
pub const SCHEDULER_SECTION: &str = "scheduler_options";
pub const PLUGIN_SECTION_PREFIX: &str = "plugin:";

const DEFAULT_VAULT_PORT: &str = "5002";
const SECRET_KEYS: &[&str] = &["db.user", "db.passwd", "db.db", "db.host", "db.port"];

/// Layout of user directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryStructure {
    /// Per-user tree under the user's home directory.
    Local,
    /// Per-user tree under a shared `base_dir_location`.
    Central,
}

/// One `[name]` block of the INI file, in file order.
#[derive(Debug, Clone, Default)]
pub struct Section {
    pub name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: &str, value: String) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries.iter().cloned().collect()
    }
}

/// The loaded, interpolated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    path: Option<PathBuf>,
    home: PathBuf,
    sections: Vec<Section>,
    secrets: BTreeMap<String, String>,
    vault_error: Option<String>,
    drs: Option<DrsConfig>,
}

impl Config {
    /// Parse configuration text. `home` backs `$EVALUATION_SYSTEM_HOME`.
    pub fn from_str(content: &str, home: &Path) -> Result<Config> {
        let raw = parse_ini(content)?;
        if !raw.iter().any(|s| s.name == MAIN_SECTION) {
            return Err(Error::Configuration(format!(
                "missing mandatory section [{}]",
                MAIN_SECTION
            )));
        }

        let sections = interpolate_sections(&raw, home)?;
        let config = Config {
            path: None,
            home: home.to_path_buf(),
            sections,
            secrets: BTreeMap::new(),
            vault_error: None,
            drs: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a config file and, if one can be found, its DRS specification.
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let mut config = Config::from_str(&content, &home_dir())?;
        config.path = Some(path.to_path_buf());

        let explicit = std::env::var_os(DRS_CONFIG_FILE_ENV)
            .map(PathBuf::from)
            .or_else(|| config.get_opt("drs_config").map(PathBuf::from));
        let drs_path = explicit
            .clone()
            .unwrap_or_else(|| config.home.join("freva").join("drs_config.toml"));
        if drs_path.exists() {
            config.drs = Some(DrsConfig::load(&drs_path)?);
        } else if explicit.is_some() {
            return Err(Error::Configuration(format!(
                "DRS config file not found: {}",
                drs_path.display()
            )));
        } else {
            debug!(path = %drs_path.display(), "no DRS config found");
        }

        Ok(config)
    }

    /// Load from `EVALUATION_SYSTEM_CONFIG_FILE` or the install default.
    pub fn load_default() -> Result<Config> {
        Config::load(&default_config_path())
    }

    /// Re-read the configuration from `path`, or from where it came from.
    pub fn reload_configuration(&mut self, path: Option<&Path>) -> Result<()> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| self.path.clone())
            .unwrap_or_else(default_config_path);
        *self = Config::load(&path)?;
        Ok(())
    }

    /// Attach a DRS specification (replacing any loaded one).
    pub fn with_drs(mut self, drs: DrsConfig) -> Self {
        self.drs = Some(drs);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    fn main_section(&self) -> &Section {
        static EMPTY: Section = Section {
            name: String::new(),
            entries: Vec::new(),
        };
        self.sections
            .iter()
            .find(|s| s.name == MAIN_SECTION)
            .unwrap_or(&EMPTY)
    }

    /// Read a key of `[evaluation_system]`.
    pub fn get(&self, key: &str) -> Result<String> {
        self.get_opt(key).ok_or_else(|| {
            let hint = match (&self.vault_error, is_secret_key(key)) {
                (Some(err), true) => format!(" (vault lookup failed: {})", err),
                _ => String::new(),
            };
            Error::Configuration(format!(
                "key '{}' not set in [{}]{}",
                key, MAIN_SECTION, hint
            ))
        })
    }

    /// Read a key of `[evaluation_system]`, falling back to `default`.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get_opt(key).unwrap_or_else(|| default.to_string())
    }

    /// Read a key of `[evaluation_system]`; empty values count as unset.
    pub fn get_opt(&self, key: &str) -> Option<String> {
        if let Some(secret) = self.secrets.get(key) {
            return Some(secret.clone());
        }
        self.main_section()
            .get(key)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// All key/value pairs of section `name`.
    ///
    /// For `scheduler_options` the per-system section
    /// `scheduler_options_<system>` is merged on top, and a missing
    /// section yields an empty map.
    pub fn get_section(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let find = |n: &str| self.sections.iter().find(|s| s.name == n);
        if name == SCHEDULER_SECTION {
            let mut merged = find(name).map(Section::to_map).unwrap_or_default();
            let system = self.scheduler_system()?;
            if let Some(over) = find(&format!("{}_{}", SCHEDULER_SECTION, system)) {
                merged.extend(over.to_map());
            }
            return Ok(merged);
        }
        find(name)
            .map(Section::to_map)
            .ok_or_else(|| Error::Configuration(format!("no section [{}]", name)))
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// `[plugin:<name>]` sections as `(name, section)`.
    pub fn plugin_sections(&self) -> Vec<(&str, &Section)> {
        self.sections
            .iter()
            .filter_map(|s| {
                s.name
                    .strip_prefix(PLUGIN_SECTION_PREFIX)
                    .map(|name| (name.trim(), s))
            })
            .collect()
    }

    pub fn get_drs_config(&self) -> Result<&DrsConfig> {
        self.drs
            .as_ref()
            .ok_or_else(|| Error::Configuration("no DRS configuration loaded".to_string()))
    }

    pub fn directory_structure(&self) -> DirectoryStructure {
        match self.get_opt("directory_structure_type").as_deref() {
            Some("central") => DirectoryStructure::Central,
            _ => DirectoryStructure::Local,
        }
    }

    pub fn scheduler_system(&self) -> Result<SchedulerSystem> {
        self.get_or("scheduler_system", "local")
            .parse()
            .map_err(Error::Configuration)
    }

    pub fn preview_path(&self) -> Option<PathBuf> {
        self.get_opt("preview_path").map(PathBuf::from)
    }

    pub fn project_data(&self) -> Option<PathBuf> {
        self.get_opt("project_data").map(PathBuf::from)
    }

    pub fn external_group(&self) -> Option<String> {
        self.get_opt("external_group")
    }

    pub fn scheduler_input_dir(&self) -> PathBuf {
        PathBuf::from(self.get_or("scheduler_input_dir", "/tmp/freva"))
    }

    pub fn scheduler_output_dir(&self) -> PathBuf {
        PathBuf::from(self.get_or("scheduler_output_dir", "/tmp/freva"))
    }

    /// SQLite file holding the history tables.
    pub fn history_db_path(&self) -> Result<PathBuf> {
        if let Some(path) = self.get_opt("db.path") {
            return Ok(PathBuf::from(path));
        }
        let location = self.get("base_dir_location")?;
        Ok(PathBuf::from(location)
            .join(self.get_or("base_dir", "evaluation_system"))
            .join("history.sqlite"))
    }

    /// `http://host:port/solr`
    pub fn solr_base_url(&self) -> Result<String> {
        let host = self.get("solr.host")?;
        let port = self.get_or("solr.port", "8983");
        Ok(format!("http://{}:{}/solr", host, port))
    }

    /// Names of the all-files and latest cores.
    pub fn solr_core_names(&self) -> (String, String) {
        (
            self.get_or("solr.core", "files"),
            self.get_or("solr.latest_core", "latest"),
        )
    }

    /// Fetch `db.*` and `solr.*` secrets from the vault named by the
    /// `PUBKEY` file.
    ///
    /// Does nothing without `PUBKEY` or `db.host`.
    pub async fn resolve_secrets(&mut self) {
        let Some(key_file) = std::env::var_os(PUBKEY_ENV) else {
            return;
        };
        let Some(host) = self.main_section().get("db.host").map(str::to_string) else {
            return;
        };
        let port = self.get_or("vault_port", DEFAULT_VAULT_PORT);
        let base_url = format!("http://{}:{}", host, port);
        self.resolve_secrets_from(Path::new(&key_file), &base_url)
            .await;
    }

    /// Like [`resolve_secrets`](Config::resolve_secrets) with an explicit
    /// key file and vault address.
    pub async fn resolve_secrets_from(&mut self, key_file: &Path, base_url: &str) {
        let result = match public_key_fingerprint(key_file) {
            Ok(fp) => fetch_vault_secrets(base_url, &fp).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(secrets) => {
                debug!(count = secrets.len(), "resolved secrets from vault");
                self.secrets = secrets;
                self.vault_error = None;
            }
            Err(e) => {
                warn!(error = %e, "vault lookup failed");
                self.vault_error = Some(e.to_string());
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(kind) = self.main_section().get("directory_structure_type") {
            if !matches!(kind, "local" | "central") {
                return Err(Error::Configuration(format!(
                    "directory_structure_type must be 'local' or 'central', got '{}'",
                    kind
                )));
            }
        }
        self.scheduler_system()?;
        Ok(())
    }
}

fn is_secret_key(key: &str) -> bool {
    SECRET_KEYS.contains(&key) || key.starts_with("db.") || key.starts_with("solr.")
}

/// `EVALUATION_SYSTEM_HOME`, or the prefix the binary is installed under.
pub fn home_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return PathBuf::from(home);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent()?.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_FILE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join("freva").join("evaluation_system.conf"))
}

fn parse_ini(content: &str) -> Result<Vec<Section>> {
    let mut sections: Vec<Section> = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = strip_inline_comment(line).trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim();
            if !sections.iter().any(|s| s.name == name) {
                sections.push(Section::new(name));
            }
            // Re-opened sections keep collecting into the first block.
            let idx = sections
                .iter()
                .position(|s| s.name == name)
                .unwrap_or(sections.len() - 1);
            let section = sections.remove(idx);
            sections.push(section);
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::Configuration(format!(
                "line {}: expected 'key = value', got '{}'",
                lineno + 1,
                line
            )));
        };
        let Some(section) = sections.last_mut() else {
            return Err(Error::Configuration(format!(
                "line {}: key '{}' outside of any section",
                lineno + 1,
                key.trim()
            )));
        };
        section.set(key.trim(), value.trim().to_string());
    }

    Ok(sections)
}

/// Drop ` # comment` / ` ; comment` tails.
fn strip_inline_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for i in 1..bytes.len() {
        if (bytes[i] == b'#' || bytes[i] == b';') && bytes[i - 1].is_ascii_whitespace() {
            return &line[..i];
        }
    }
    line
}

fn interpolate_sections(raw: &[Section], home: &Path) -> Result<Vec<Section>> {
    let main = raw
        .iter()
        .find(|s| s.name == MAIN_SECTION)
        .map(Section::to_map)
        .unwrap_or_default();
    let home_str = home.to_string_lossy().to_string();
    let fallback = move |name: &str| {
        if name == HOME_ENV {
            Some(home_str.clone())
        } else {
            std::env::var(name).ok()
        }
    };

    let mut out = Vec::with_capacity(raw.len());
    for section in raw {
        let mut scope = main.clone();
        scope.extend(section.to_map());
        let mut interp = Interpolation::new(&scope, &fallback);

        let mut resolved = Section::new(&section.name);
        for (key, _) in section.iter() {
            let value = interp.resolve(key).map_err(|e| match e {
                Error::Configuration(msg) => {
                    Error::Configuration(format!("[{}] {}: {}", section.name, key, msg))
                }
                other => other,
            })?;
            resolved.set(key, value);
        }
        out.push(resolved);
    }
    Ok(out)
}

/// Hex SHA-256 of the (trimmed) public key file.
pub fn public_key_fingerprint(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("cannot read public key {}: {}", path.display(), e))
    })?;
    let digest = Sha256::digest(content.trim().as_bytes());
    Ok(hex::encode(digest))
}

/// `GET {base_url}/vault/data/{fingerprint}` → `db.*` / `solr.*` pairs.
///
/// Bare keys (`user`, `passwd`, ...) are taken as `db.*`.
pub async fn fetch_vault_secrets(
    base_url: &str,
    fingerprint: &str,
) -> Result<BTreeMap<String, String>> {
    let url = format!(
        "{}/vault/data/{}",
        base_url.trim_end_matches('/'),
        fingerprint
    );
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let resp = client.get(&url).send().await?;
    if !resp.status().is_success() {
        return Err(Error::Configuration(format!(
            "vault returned HTTP {} for {}",
            resp.status(),
            url
        )));
    }
    let body: serde_json::Value = resp.json().await?;
    let obj = body
        .as_object()
        .ok_or_else(|| Error::Configuration("vault response is not a JSON object".to_string()))?;

    let mut secrets = BTreeMap::new();
    for (key, value) in obj {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => continue,
            other => other.to_string(),
        };
        let key = if key.starts_with("db.") || key.starts_with("solr.") {
            key.clone()
        } else {
            format!("db.{}", key)
        };
        secrets.insert(key, text);
    }
    Ok(secrets)
}

// ═══════════════════════════════════════════════════════════════════════
// Swappable handle
// ═══════════════════════════════════════════════════════════════════════

/// Shared, swappable configuration.
///
/// Long-lived components hold a handle and read [`current`](Self::current)
/// per operation, so [`swap`](Self::swap) can temporarily install another
/// configuration.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn current(&self) -> Arc<Config> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Install `config`, returning the previous one.
    pub fn replace(&self, config: Config) -> Arc<Config> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, Arc::new(config))
    }

    /// Install `config` until the returned guard is dropped.
    pub fn swap(&self, config: Config) -> ConfigGuard {
        let previous = self.replace(config);
        ConfigGuard {
            handle: self.clone(),
            previous: Some(previous),
        }
    }

    /// Reload from `path` (or the current config's own file).
    pub fn reload(&self, path: Option<&Path>) -> Result<()> {
        let mut config = (*self.current()).clone();
        config.reload_configuration(path)?;
        self.replace(config);
        Ok(())
    }
}

/// Restores the previous configuration when dropped.
pub struct ConfigGuard {
    handle: ConfigHandle,
    previous: Option<Arc<Config>>,
}

impl Drop for ConfigGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let mut guard = match self.handle.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = previous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE: &str = r#"
[evaluation_system]
base_dir = evaluation_system
base_dir_location = /tmp/evaluation_system_test
directory_structure_type = central   # local or central
project_data = $base_dir_location/user_data
preview_path = /tmp/preview
scheduler_system = slurm
scheduler_input_dir = /tmp/slurm
scheduler_output_dir = /tmp/slurm
db.host = localhost
solr.host = localhost
solr.port = 8983
solr.core = files

[scheduler_options]
source = $EVALUATION_SYSTEM_HOME/activate_sh
queue = compute
memory = 10G

[scheduler_options_slurm]
queue = shared

[plugin:dummy]
plugin_path = ${project_data}/plugins/dummy
"#;

    fn sample() -> Config {
        Config::from_str(SAMPLE, Path::new("/opt/freva")).unwrap()
    }

    #[test]
    fn parses_sections_and_keys() {
        let cfg = sample();
        assert_eq!(cfg.get("base_dir").unwrap(), "evaluation_system");
        assert_eq!(cfg.get("directory_structure_type").unwrap(), "central");
        assert_eq!(cfg.directory_structure(), DirectoryStructure::Central);
        assert_eq!(cfg.scheduler_system().unwrap(), SchedulerSystem::Slurm);
        assert_eq!(cfg.solr_base_url().unwrap(), "http://localhost:8983/solr");
        assert_eq!(cfg.solr_core_names(), ("files".to_string(), "latest".to_string()));
    }

    #[test]
    fn interpolates_keys_and_home() {
        let cfg = sample();
        assert_eq!(
            cfg.get("project_data").unwrap(),
            "/tmp/evaluation_system_test/user_data"
        );
        let sched = cfg.get_section("scheduler_options").unwrap();
        assert_eq!(sched["source"], "/opt/freva/activate_sh");
        let plugins = cfg.plugin_sections();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].0, "dummy");
        assert_eq!(
            plugins[0].1.get("plugin_path"),
            Some("/tmp/evaluation_system_test/user_data/plugins/dummy")
        );
    }

    #[test]
    fn scheduler_options_merge_system_overrides() {
        let sched = sample().get_section("scheduler_options").unwrap();
        assert_eq!(sched["queue"], "shared");
        assert_eq!(sched["memory"], "10G");
    }

    #[test]
    fn missing_key_is_configuration_error() {
        let err = sample().get("nope").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(sample().get_or("nope", "x"), "x");
    }

    #[test]
    fn cycle_is_reported() {
        let text = "[evaluation_system]\na = $b\nb = $a\n";
        let err = Config::from_str(text, Path::new("/")).unwrap_err().to_string();
        assert!(err.contains("cyclic reference"), "{}", err);
    }

    #[test]
    fn rejects_invalid_directory_structure() {
        let text = "[evaluation_system]\ndirectory_structure_type = shared\n";
        assert!(Config::from_str(text, Path::new("/")).is_err());
    }

    #[test]
    fn rejects_unknown_scheduler() {
        let text = "[evaluation_system]\nscheduler_system = condor\n";
        assert!(Config::from_str(text, Path::new("/")).is_err());
    }

    #[test]
    fn requires_main_section() {
        assert!(Config::from_str("[other]\na = 1\n", Path::new("/")).is_err());
    }

    #[test]
    fn swap_guard_restores_previous() {
        let handle = ConfigHandle::new(sample());
        {
            let other =
                Config::from_str("[evaluation_system]\nbase_dir = other\n", Path::new("/"))
                    .unwrap();
            let _guard = handle.swap(other);
            assert_eq!(handle.current().get("base_dir").unwrap(), "other");
        }
        assert_eq!(handle.current().get("base_dir").unwrap(), "evaluation_system");
    }

    #[test]
    fn load_reads_file_and_drs() {
        let dir = tempfile::tempdir().unwrap();
        let drs_path = dir.path().join("drs.toml");
        std::fs::write(
            &drs_path,
            "[observations]\nroot_dir = \"/data/obs\"\nparts_dir = [\"project\", \"variable\", \"file_name\"]\n",
        )
        .unwrap();
        let cfg_path = dir.path().join("freva.conf");
        std::fs::write(
            &cfg_path,
            format!(
                "[evaluation_system]\nbase_dir = x\ndrs_config = {}\n",
                drs_path.display()
            ),
        )
        .unwrap();

        let cfg = Config::load(&cfg_path).unwrap();
        assert_eq!(cfg.path(), Some(cfg_path.as_path()));
        assert!(cfg.get_drs_config().unwrap().get("observations").is_ok());
    }

    #[tokio::test]
    async fn vault_secrets_fill_db_keys() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key.pub");
        std::fs::write(&key, "ssh-rsa AAAA test\n").unwrap();
        let fp = public_key_fingerprint(&key).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/vault/data/{}", fp)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"user": "freva", "passwd": "secret", "port": 3306})),
            )
            .mount(&server)
            .await;

        let mut cfg = sample();
        cfg.resolve_secrets_from(&key, &server.uri()).await;
        assert_eq!(cfg.get("db.passwd").unwrap(), "secret");
        assert_eq!(cfg.get("db.port").unwrap(), "3306");
    }

    #[tokio::test]
    async fn vault_keeps_solr_keys() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key.pub");
        std::fs::write(&key, "ssh-rsa CCCC").unwrap();
        let fp = public_key_fingerprint(&key).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/vault/data/{}", fp)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "solr.passwd": "s3",
                "db.user": "freva",
                "passwd": "secret"
            })))
            .mount(&server)
            .await;

        let secrets = fetch_vault_secrets(&server.uri(), &fp).await.unwrap();
        let keys: Vec<&str> = secrets.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["db.passwd", "db.user", "solr.passwd"]);

        let mut cfg = sample();
        cfg.resolve_secrets_from(&key, &server.uri()).await;
        assert_eq!(cfg.get("solr.passwd").unwrap(), "s3");
        assert_eq!(cfg.get("db.passwd").unwrap(), "secret");
    }

    #[tokio::test]
    async fn vault_failure_only_surfaces_for_missing_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key.pub");
        std::fs::write(&key, "ssh-rsa BBBB").unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut cfg = sample();
        cfg.resolve_secrets_from(&key, &server.uri()).await;
        assert_eq!(cfg.get("db.host").unwrap(), "localhost");
        let err = cfg.get("db.passwd").unwrap_err().to_string();
        assert!(err.contains("vault"), "{}", err);
    }
}
