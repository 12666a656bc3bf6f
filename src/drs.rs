//! Directory reference syntax (DRS).
//!
//! Each data type declares how its facets are laid out on disk: one
//! directory level per entry of `parts_dir` (the last one being the file
//! itself) and `_`-separated facets inside the file name. A [`DrsFile`]
//! is the structured form of such a path; `from_path` and `to_path` are
//! inverse for well-formed inputs.

use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::models::{iso_utc, IndexDocument};

/// Name of the `parts_dir` entry holding the file name.
pub const FILE_PART: &str = "file_name";
/// DRS type used for files produced by plugins.
pub const USER_DATA_TYPE: &str = "crawl_my_data";
/// Ensemble token of time-invariant (fx) files, whose names carry no time.
const FX_ENSEMBLE: &str = "r0i0p0";

/// Layout of one data type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrsStructure {
    pub root_dir: PathBuf,
    pub parts_dir: Vec<String>,
    #[serde(default)]
    pub parts_file_name: Vec<String>,
    /// e.g. `start_time-end_time`: how the `time` file token splits.
    #[serde(default)]
    pub parts_time: Option<String>,
    #[serde(default)]
    pub parts_dataset: Option<Vec<String>>,
    #[serde(default)]
    pub parts_versioned_dataset: Option<Vec<String>>,
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

impl DrsStructure {
    pub fn is_versioned(&self) -> bool {
        self.parts_versioned_dataset.is_some()
    }

    fn time_names(&self) -> Vec<&str> {
        self.parts_time
            .as_deref()
            .map(|t| t.split('-').collect())
            .unwrap_or_default()
    }
}

/// All configured DRS types, keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrsConfig {
    types: BTreeMap<String, DrsStructure>,
}

impl DrsConfig {
    pub fn from_str(content: &str) -> Result<DrsConfig> {
        let config: DrsConfig = toml::from_str(content)?;
        for (name, structure) in &config.types {
            if structure.parts_dir.last().map(String::as_str) != Some(FILE_PART) {
                return Err(Error::Configuration(format!(
                    "DRS type '{}': parts_dir must end with '{}'",
                    name, FILE_PART
                )));
            }
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<DrsConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read DRS config {}: {}", path.display(), e))
        })?;
        DrsConfig::from_str(&content)
    }

    pub fn get(&self, drs_type: &str) -> Result<&DrsStructure> {
        self.types.get(drs_type).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown DRS type '{}' (known: {})",
                drs_type,
                self.type_names().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DrsStructure)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The type whose `root_dir` is the longest prefix of `path`.
    pub fn type_for_path(&self, path: &Path) -> Option<&str> {
        self.types
            .iter()
            .filter(|(_, s)| path.starts_with(canonical_or_absolute(&s.root_dir)))
            .max_by_key(|(_, s)| s.root_dir.components().count())
            .map(|(name, _)| name.as_str())
    }

    /// Facet names in layout order, deduplicated.
    pub fn facet_names(&self, drs_type: Option<&str>) -> Result<Vec<String>> {
        let structures: Vec<&DrsStructure> = match drs_type {
            Some(t) => vec![self.get(t)?],
            None => self.types.values().collect(),
        };
        let mut names: Vec<String> = Vec::new();
        for s in structures {
            let candidates = s
                .parts_dir
                .iter()
                .chain(s.parts_file_name.iter())
                .map(String::as_str)
                .chain(s.time_names());
            for name in candidates {
                if name == FILE_PART || name == "time" || name.is_empty() {
                    continue;
                }
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

/// A data file described by its DRS facets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrsFile {
    pub root_dir: PathBuf,
    pub drs_type: String,
    pub parts: BTreeMap<String, String>,
    structure: DrsStructure,
}

impl PartialEq for DrsStructure {
    fn eq(&self, other: &Self) -> bool {
        self.root_dir == other.root_dir && self.parts_dir == other.parts_dir
    }
}

impl Eq for DrsStructure {}

impl DrsFile {
    /// Parse `path` as a file of `drs_type`, or of the type whose root
    /// contains it.
    pub fn from_path(config: &DrsConfig, path: &Path, drs_type: Option<&str>) -> Result<DrsFile> {
        let path = canonical_or_absolute(path);
        let drs_type = match drs_type {
            Some(t) => t.to_string(),
            None => config
                .type_for_path(&path)
                .ok_or_else(|| Error::DrsParse {
                    path: path.display().to_string(),
                    drs_type: "?".to_string(),
                    reason: "not below any configured root_dir".to_string(),
                })?
                .to_string(),
        };
        let structure = config.get(&drs_type)?;
        let parse_err = |reason: String| Error::DrsParse {
            path: path.display().to_string(),
            drs_type: drs_type.clone(),
            reason,
        };

        let root = canonical_or_absolute(&structure.root_dir);
        let rel = path
            .strip_prefix(&root)
            .map_err(|_| parse_err(format!("not below root_dir {}", root.display())))?;
        let comps: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        if comps.len() != structure.parts_dir.len() {
            return Err(parse_err(format!(
                "expected {} path levels below root, found {}",
                structure.parts_dir.len(),
                comps.len()
            )));
        }

        let mut parts: BTreeMap<String, String> = structure
            .parts_dir
            .iter()
            .cloned()
            .zip(comps.iter().cloned())
            .collect();

        let file_name = comps.last().cloned().unwrap_or_default();
        if !structure.parts_file_name.is_empty() {
            let stem = Path::new(&file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let tokens: Vec<&str> = stem.split('_').collect();
            let names: Vec<&str> = if tokens.len() == structure.parts_file_name.len() {
                structure.parts_file_name.iter().map(String::as_str).collect()
            } else if tokens.len() + 1 == structure.parts_file_name.len()
                && structure.parts_file_name.iter().any(|n| n == "time")
            {
                structure
                    .parts_file_name
                    .iter()
                    .map(String::as_str)
                    .filter(|n| *n != "time")
                    .collect()
            } else {
                return Err(parse_err(format!(
                    "file name has {} '_' separated parts, expected {}",
                    tokens.len(),
                    structure.parts_file_name.len()
                )));
            };

            let missing_time = names.len() < structure.parts_file_name.len();
            for (name, token) in names.iter().zip(tokens) {
                parts
                    .entry(name.to_string())
                    .or_insert_with(|| token.to_string());
            }
            if missing_time && parts.get("ensemble").map(String::as_str) != Some(FX_ENSEMBLE) {
                return Err(parse_err(format!(
                    "time segment missing but ensemble is not {}",
                    FX_ENSEMBLE
                )));
            }
        }

        if let Some(time) = parts.get("time").cloned() {
            let names = structure.time_names();
            let values: Vec<&str> = time.split('-').collect();
            if names.len() > 1 && names.len() == values.len() {
                for (name, value) in names.into_iter().zip(values) {
                    parts.insert(name.to_string(), value.to_string());
                }
            }
        }

        Ok(DrsFile {
            root_dir: root,
            drs_type,
            parts,
            structure: structure.clone(),
        })
    }

    /// Build a record from facets; every `parts_dir` entry must be given.
    pub fn from_parts(
        config: &DrsConfig,
        drs_type: &str,
        parts: BTreeMap<String, String>,
    ) -> Result<DrsFile> {
        let structure = config.get(drs_type)?;
        if let Some(missing) = structure.parts_dir.iter().find(|p| !parts.contains_key(*p)) {
            return Err(Error::DrsParse {
                path: String::new(),
                drs_type: drs_type.to_string(),
                reason: format!("missing part '{}'", missing),
            });
        }
        Ok(DrsFile {
            root_dir: canonical_or_absolute(&structure.root_dir),
            drs_type: drs_type.to_string(),
            parts,
            structure: structure.clone(),
        })
    }

    pub fn to_path(&self) -> PathBuf {
        self.path_skipping(None)
    }

    fn path_skipping(&self, skip: Option<&str>) -> PathBuf {
        let mut path = self.root_dir.clone();
        for name in &self.structure.parts_dir {
            if Some(name.as_str()) == skip {
                continue;
            }
            if let Some(value) = self.parts.get(name) {
                path.push(value);
            }
        }
        path
    }

    pub fn is_versioned(&self) -> bool {
        self.structure.is_versioned() && self.parts.contains_key("version")
    }

    pub fn version(&self) -> Option<&str> {
        self.parts.get("version").map(String::as_str)
    }

    /// The path with its version directory removed.
    pub fn file_no_version(&self) -> PathBuf {
        if self.is_versioned() {
            self.path_skipping(Some("version"))
        } else {
            self.to_path()
        }
    }

    /// Dot-joined dataset identifier.
    pub fn dataset_id(&self, versioned: bool) -> String {
        let declared = if versioned {
            self.structure.parts_versioned_dataset.as_ref()
        } else {
            self.structure.parts_dataset.as_ref()
        };
        let names: Vec<&str> = match declared {
            Some(names) => names.iter().map(String::as_str).collect(),
            None => self
                .structure
                .parts_dir
                .iter()
                .map(String::as_str)
                .filter(|n| *n != FILE_PART && (versioned || *n != "version"))
                .collect(),
        };
        names
            .into_iter()
            .filter_map(|n| self.parts.get(n).map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Facets identifying the unversioned dataset, as index filters.
    pub fn dataset_parts(&self) -> BTreeMap<String, String> {
        let names: Vec<&str> = match &self.structure.parts_dataset {
            Some(names) => names.iter().map(String::as_str).collect(),
            None => self
                .structure
                .parts_dir
                .iter()
                .map(String::as_str)
                .filter(|n| *n != FILE_PART && *n != "version")
                .collect(),
        };
        names
            .into_iter()
            .filter_map(|n| self.parts.get(n).map(|v| (n.to_string(), v.clone())))
            .collect()
    }

    pub fn to_index_document(&self, timestamp: f64) -> IndexDocument {
        IndexDocument {
            file: self.to_path().display().to_string(),
            file_no_version: self.file_no_version().display().to_string(),
            data_type: self.drs_type.clone(),
            timestamp,
            creation_time: iso_utc(timestamp),
            parts: self
                .parts
                .iter()
                .filter(|(k, _)| k.as_str() != FILE_PART)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Files of `drs_type` matching the given facets.
    ///
    /// With `latest_version`, only the files of the highest version of
    /// each dataset are returned (all of them on a tie).
    pub fn search(
        config: &DrsConfig,
        drs_type: &str,
        latest_version: bool,
        partial: &BTreeMap<String, String>,
    ) -> Result<Vec<DrsFile>> {
        let structure = config.get(drs_type)?;
        let root = canonical_or_absolute(&structure.root_dir);
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let pattern: Vec<String> = structure
            .parts_dir
            .iter()
            .map(|name| {
                partial
                    .get(name)
                    .map(|value| globset::escape(value))
                    .unwrap_or_else(|| "*".to_string())
            })
            .collect();
        let matcher = GlobBuilder::new(&pattern.join("/"))
            .literal_separator(true)
            .build()
            .map_err(|e| Error::Configuration(format!("invalid search pattern: {}", e)))?
            .compile_matcher();

        let depth = structure.parts_dir.len();
        let mut found = Vec::new();
        for entry in WalkDir::new(&root)
            .min_depth(depth)
            .max_depth(depth)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };
            if !matcher.is_match(rel) {
                continue;
            }
            match DrsFile::from_path(config, entry.path(), Some(drs_type)) {
                Ok(file) if partial.iter().all(|(k, v)| file.parts.get(k) == Some(v)) => {
                    found.push(file)
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "skipping non-DRS file"),
            }
        }

        if latest_version && structure.is_versioned() {
            let mut newest: HashMap<String, String> = HashMap::new();
            for f in &found {
                let version = f.version().unwrap_or_default().to_string();
                let slot = newest.entry(f.dataset_id(false)).or_default();
                if version > *slot {
                    *slot = version;
                }
            }
            found.retain(|f| {
                newest.get(&f.dataset_id(false)).map(String::as_str)
                    == Some(f.version().unwrap_or_default())
            });
        }
        Ok(found)
    }
}

/// Where a plugin output file is placed inside the user data tree.
///
/// The project is `user-<name>` and the product the lower-cased plugin
/// name; other directory facets come from the type's defaults.
pub fn user_data_file(
    config: &DrsConfig,
    user: &str,
    tool: &str,
    output: &Path,
) -> Result<DrsFile> {
    let structure = config.get(USER_DATA_TYPE)?;
    let file_name = output
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .ok_or_else(|| Error::DrsParse {
            path: output.display().to_string(),
            drs_type: USER_DATA_TYPE.to_string(),
            reason: "output has no file name".to_string(),
        })?;

    let parts = structure
        .parts_dir
        .iter()
        .map(|name| {
            let value = match name.as_str() {
                "project" => format!("user-{}", user),
                "product" => tool.to_lowercase(),
                FILE_PART => file_name.clone(),
                other => structure
                    .defaults
                    .get(other)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
            };
            (name.clone(), value)
        })
        .collect();
    DrsFile::from_parts(config, USER_DATA_TYPE, parts)
}

/// Hard-link `src` to `dest` (copying across filesystems), creating
/// parent directories and replacing an existing `dest`.
pub fn link_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if dest.exists() {
        std::fs::remove_file(dest)?;
    }
    if std::fs::hard_link(src, dest).is_err() {
        std::fs::copy(src, dest)?;
    }
    Ok(())
}

/// Symlink-resolved path when it exists, otherwise a lexically
/// normalised absolute path.
fn canonical_or_absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut out = PathBuf::new();
    for comp in absolute.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn cmip5_toml(root: &Path) -> String {
        format!(
            r#"
[cmip5]
root_dir = "{root}"
parts_dir = ["project", "product", "institute", "model", "experiment", "time_frequency", "realm", "cmor_table", "ensemble", "version", "variable", "file_name"]
parts_file_name = ["variable", "cmor_table", "model", "experiment", "ensemble", "time"]
parts_time = "start_time-end_time"
parts_dataset = ["project", "product", "institute", "model", "experiment", "time_frequency", "realm", "cmor_table", "ensemble", "variable"]
parts_versioned_dataset = ["project", "product", "institute", "model", "experiment", "time_frequency", "realm", "cmor_table", "ensemble", "version", "variable"]

[cmip5.defaults]
project = "cmip5"

[crawl_my_data]
root_dir = "{root}/user_data"
parts_dir = ["project", "product", "institute", "model", "experiment", "time_frequency", "realm", "variable", "ensemble", "file_name"]

[crawl_my_data.defaults]
institute = "freva"
"#,
            root = root.display()
        )
    }

    const REL: &str = "cmip5/output1/MOHC/HadCM3/decadal2008/mon/atmos/Amon/r9i3p1/v20110419/ua/ua_Amon_HadCM3_decadal2008_r9i3p1_200811-201812.nc";

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn parses_and_renders_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let cfg = DrsConfig::from_str(&cmip5_toml(&root)).unwrap();
        let path = root.join(REL);
        touch(&path);

        let f = DrsFile::from_path(&cfg, &path, None).unwrap();
        assert_eq!(f.drs_type, "cmip5");
        assert_eq!(f.parts["variable"], "ua");
        assert_eq!(f.parts["start_time"], "200811");
        assert_eq!(f.parts["end_time"], "201812");
        assert_eq!(f.version(), Some("v20110419"));
        assert_eq!(f.to_path(), path);
        assert_eq!(
            f.dataset_id(true),
            "cmip5.output1.MOHC.HadCM3.decadal2008.mon.atmos.Amon.r9i3p1.v20110419.ua"
        );
        assert_eq!(
            f.dataset_id(false),
            "cmip5.output1.MOHC.HadCM3.decadal2008.mon.atmos.Amon.r9i3p1.ua"
        );
        assert!(!f.file_no_version().to_string_lossy().contains("v20110419"));
    }

    #[test]
    fn fx_files_may_lack_time() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let cfg = DrsConfig::from_str(&cmip5_toml(&root)).unwrap();
        let path = root.join(
            "cmip5/output1/MOHC/HadCM3/decadal2008/fx/atmos/fx/r0i0p0/v20110419/orog/orog_fx_HadCM3_decadal2008_r0i0p0.nc",
        );
        let f = DrsFile::from_path(&cfg, &path, Some("cmip5")).unwrap();
        assert!(!f.parts.contains_key("time"));

        let bad = root.join(
            "cmip5/output1/MOHC/HadCM3/decadal2008/fx/atmos/fx/r1i1p1/v20110419/orog/orog_fx_HadCM3_decadal2008_r1i1p1.nc",
        );
        assert!(matches!(
            DrsFile::from_path(&cfg, &bad, Some("cmip5")),
            Err(Error::DrsParse { .. })
        ));
    }

    #[test]
    fn wrong_depth_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let cfg = DrsConfig::from_str(&cmip5_toml(&root)).unwrap();
        let err = DrsFile::from_path(&cfg, &root.join("cmip5/a.nc"), Some("cmip5")).unwrap_err();
        assert!(matches!(err, Error::DrsParse { .. }));
        assert!(DrsFile::from_path(&cfg, &root.join(REL), Some("nope")).is_err());
    }

    #[test]
    fn search_keeps_latest_version() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let cfg = DrsConfig::from_str(&cmip5_toml(&root)).unwrap();
        for version in ["v20110419", "v20110719"] {
            touch(&root.join(REL.replace("v20110419", version)));
        }
        touch(&root.join(REL.replace("/ua/ua_", "/tas/tas_")));

        let mut facets = BTreeMap::new();
        facets.insert("variable".to_string(), "ua".to_string());
        let all = DrsFile::search(&cfg, "cmip5", false, &facets).unwrap();
        assert_eq!(all.len(), 2);
        let latest = DrsFile::search(&cfg, "cmip5", true, &facets).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version(), Some("v20110719"));

        facets.insert("variable".to_string(), "pr".to_string());
        assert!(DrsFile::search(&cfg, "cmip5", true, &facets).unwrap().is_empty());
    }

    #[test]
    fn user_data_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let cfg = DrsConfig::from_str(&cmip5_toml(&root)).unwrap();
        let f = user_data_file(&cfg, "jdoe", "DummyPlugin", Path::new("/out/result.nc")).unwrap();
        assert_eq!(
            f.to_path(),
            root.join("user_data/user-jdoe/dummyplugin/freva/unknown/unknown/unknown/unknown/unknown/unknown/result.nc")
        );
        assert!(!f.is_versioned());
        assert_eq!(f.file_no_version(), f.to_path());
    }

    #[test]
    fn facet_names_are_deduplicated() {
        let cfg = DrsConfig::from_str(&cmip5_toml(Path::new("/data"))).unwrap();
        let names = cfg.facet_names(Some("cmip5")).unwrap();
        assert_eq!(names.first().map(String::as_str), Some("project"));
        assert!(names.contains(&"start_time".to_string()));
        assert_eq!(names.iter().filter(|n| *n == "variable").count(), 1);
        assert!(!names.contains(&"file_name".to_string()));
    }

    #[test]
    fn requires_file_name_part() {
        let text = "[x]\nroot_dir = \"/d\"\nparts_dir = [\"a\"]\n";
        assert!(DrsConfig::from_str(text).is_err());
    }
}
