//! Crawl manifests and index loading.
//!
//! A crawl runs in two phases. [`dump`] walks a directory and writes a
//! manifest:
//!
//! ```text
//! crawl_dir<TAB>/abs/root
//!
//! data
//! /abs/root/a/b/file.nc,1303214400.5
//! ```
//!
//! (gzip-compressed when the file name ends in `.gz`). [`load`] reads it
//! back, parses every path as a [`DrsFile`] and posts the documents in
//! chunks to the all-files core and, for the newest version of each
//! dataset, to the latest core.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::drs::{DrsConfig, DrsFile};
use crate::error::{Error, Result};
use crate::solr::{Filter, IndexCores, SolrQuery, FILE_KEY};

const HEADER_KEY: &str = "crawl_dir";
const DATA_MARKER: &str = "data";

/// How `dump` treats paths that are not valid DRS paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrictMode {
    /// Write every file.
    #[default]
    Off,
    /// Leave unparseable files out.
    Skip,
    /// Fail on the first unparseable file.
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    pub drs_type: Option<String>,
    pub strict: StrictMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub files: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub chunk_size: usize,
    pub abort_on_errors: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            abort_on_errors: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Documents sent to the all-files core.
    pub files: usize,
    /// Documents sent to the latest core.
    pub latest: usize,
    /// Paths that could not be parsed.
    pub skipped: usize,
    /// Chunks the index rejected.
    pub failed_chunks: usize,
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

/// Walk `root` and write a manifest to `manifest`.
pub fn dump(
    drs: Option<&DrsConfig>,
    root: &Path,
    manifest: &Path,
    opts: &DumpOptions,
) -> Result<DumpStats> {
    let root = std::fs::canonicalize(root)?;
    if !root.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a directory", root.display()),
        )));
    }
    let checker = match (opts.strict, drs) {
        (StrictMode::Off, _) => None,
        (_, Some(drs)) => Some(drs),
        (_, None) => {
            return Err(Error::Configuration(
                "strict crawling needs a DRS configuration".to_string(),
            ))
        }
    };

    let file = File::create(manifest)?;
    let stats = if is_gzip(manifest) {
        let mut enc = GzEncoder::new(BufWriter::new(file), Compression::default());
        let stats = write_manifest(&mut enc, &root, checker, opts)?;
        enc.finish()?.flush()?;
        stats
    } else {
        let mut w = BufWriter::new(file);
        let stats = write_manifest(&mut w, &root, checker, opts)?;
        w.flush()?;
        stats
    };
    info!(root = %root.display(), files = stats.files, skipped = stats.skipped, "crawl dumped");
    Ok(stats)
}

fn write_manifest<W: Write>(
    w: &mut W,
    root: &Path,
    checker: Option<&DrsConfig>,
    opts: &DumpOptions,
) -> Result<DumpStats> {
    let mut stats = DumpStats::default();
    write!(w, "{}\t{}\n\n{}\n", HEADER_KEY, root.display(), DATA_MARKER)?;

    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "cannot read directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(drs) = checker {
            if let Err(e) = DrsFile::from_path(drs, path, opts.drs_type.as_deref()) {
                if opts.strict == StrictMode::Abort {
                    return Err(e);
                }
                debug!(path = %path.display(), error = %e, "skipping");
                stats.skipped += 1;
                continue;
            }
        }
        let mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        writeln!(w, "{},{}", path.display(), mtime)?;
        stats.files += 1;
    }
    Ok(stats)
}

/// One line of a manifest.
#[derive(Debug, Clone, PartialEq)]
enum Record {
    CrawlDir(PathBuf),
    File(PathBuf, f64),
}

fn read_manifest(manifest: &Path) -> Result<String> {
    let mut content = String::new();
    let file = File::open(manifest)?;
    if is_gzip(manifest) {
        GzDecoder::new(file).read_to_string(&mut content)?;
    } else {
        std::io::BufReader::new(file).read_to_string(&mut content)?;
    }
    Ok(content)
}

fn parse_manifest(content: &str) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut in_data = false;
    for (lineno, line) in content.lines().enumerate() {
        let malformed = || {
            Error::Validation(format!(
                "malformed manifest line {}: '{}'",
                lineno + 1,
                line
            ))
        };
        if let Some(root) = line.strip_prefix(HEADER_KEY).and_then(|r| r.strip_prefix('\t')) {
            records.push(Record::CrawlDir(PathBuf::from(root)));
            in_data = false;
            continue;
        }
        if !in_data {
            match line.trim() {
                "" => continue,
                DATA_MARKER if !records.is_empty() => {
                    in_data = true;
                    continue;
                }
                _ => return Err(malformed()),
            }
        }
        if line.trim().is_empty() {
            continue;
        }
        let (path, mtime) = line.rsplit_once(',').ok_or_else(malformed)?;
        let mtime: f64 = mtime.trim().parse().map_err(|_| malformed())?;
        records.push(Record::File(PathBuf::from(path), mtime));
    }
    Ok(records)
}

/// Load a manifest into both cores.
///
/// Existing documents below a `crawl_dir` are removed right before the
/// first file of that section is indexed; a section without files
/// leaves the index untouched.
pub async fn load(
    cores: &IndexCores,
    drs: &DrsConfig,
    manifest: &Path,
    opts: &LoadOptions,
) -> Result<LoadStats> {
    let records = parse_manifest(&read_manifest(manifest)?)?;
    let mut indexer = Indexer::new(cores, opts);

    for record in records {
        match record {
            Record::CrawlDir(root) => {
                indexer.flush().await?;
                indexer.pending_prefix = Some(root);
            }
            Record::File(path, mtime) => match DrsFile::from_path(drs, &path, None) {
                Ok(file) => indexer.add(file, mtime).await?,
                Err(e) if opts.abort_on_errors => return Err(e),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping file");
                    indexer.stats.skipped += 1;
                }
            },
        }
    }
    indexer.flush().await?;
    info!(
        manifest = %manifest.display(),
        files = indexer.stats.files,
        latest = indexer.stats.latest,
        skipped = indexer.stats.skipped,
        "crawl loaded"
    );
    Ok(indexer.stats)
}

/// Index already parsed files (plugin outputs) without any prefix delete.
pub async fn ingest_files(
    cores: &IndexCores,
    files: Vec<(DrsFile, f64)>,
    opts: &LoadOptions,
) -> Result<LoadStats> {
    let mut indexer = Indexer::new(cores, opts);
    for (file, mtime) in files {
        indexer.add(file, mtime).await?;
    }
    indexer.flush().await?;
    Ok(indexer.stats)
}

/// Modification time of `path` as float epoch seconds.
pub fn mtime_of(path: &Path) -> Result<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0))
}

struct Pending {
    dataset: String,
    doc: Value,
}

struct Indexer<'a> {
    cores: &'a IndexCores,
    opts: &'a LoadOptions,
    pending_prefix: Option<PathBuf>,
    files_buf: Vec<Value>,
    latest_buf: Vec<Pending>,
    /// `<data_type>:<dataset id>` → highest version seen.
    max_version: HashMap<String, String>,
    stats: LoadStats,
}

impl<'a> Indexer<'a> {
    fn new(cores: &'a IndexCores, opts: &'a LoadOptions) -> Self {
        Self {
            cores,
            opts,
            pending_prefix: None,
            files_buf: Vec::new(),
            latest_buf: Vec::new(),
            max_version: HashMap::new(),
            stats: LoadStats::default(),
        }
    }

    async fn add(&mut self, file: DrsFile, mtime: f64) -> Result<()> {
        if let Some(prefix) = self.pending_prefix.take() {
            let prefix = format!("{}/", prefix.display().to_string().trim_end_matches('/'));
            info!(prefix = %prefix, "removing previously indexed files");
            let filter = [Filter::starts_with(FILE_KEY, &prefix)];
            self.cores.files.delete_where(&filter).await?;
            self.cores.latest.delete_where(&filter).await?;
            self.max_version.clear();
        }

        let doc = file.to_index_document(mtime).to_json();
        self.files_buf.push(doc.clone());

        if !file.is_versioned() {
            self.latest_buf.push(Pending {
                dataset: String::new(),
                doc,
            });
        } else {
            let dataset = format!("{}:{}", file.drs_type, file.dataset_id(false));
            let version = file.version().unwrap_or_default().to_string();
            let current = self.current_version(&dataset, &file).await?;

            if version > current {
                if !current.is_empty() {
                    self.drop_older_versions(&dataset, &file, &version).await?;
                }
                self.max_version.insert(dataset.clone(), version);
                self.latest_buf.push(Pending { dataset, doc });
            } else if version == current {
                self.latest_buf.push(Pending { dataset, doc });
            } else {
                debug!(file = %file.to_path().display(), "older version, not in latest core");
            }
        }

        if self.files_buf.len() >= self.opts.chunk_size {
            self.flush_files().await?;
        }
        if self.latest_buf.len() >= self.opts.chunk_size {
            self.flush_latest().await?;
        }
        Ok(())
    }

    /// Highest known version of a dataset, asking the latest core once.
    async fn current_version(&mut self, dataset: &str, file: &DrsFile) -> Result<String> {
        if let Some(v) = self.max_version.get(dataset) {
            return Ok(v.clone());
        }
        let resp = self
            .cores
            .latest
            .query(&SolrQuery {
                filters: dataset_filters(file),
                fields: vec!["version".to_string()],
                rows: 1,
                sort: Some("version desc".to_string()),
                ..SolrQuery::default()
            })
            .await?;
        let version = resp
            .docs
            .first()
            .and_then(|d| d.get("version"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.max_version.insert(dataset.to_string(), version.clone());
        Ok(version)
    }

    async fn drop_older_versions(
        &mut self,
        dataset: &str,
        file: &DrsFile,
        version: &str,
    ) -> Result<()> {
        self.latest_buf.retain(|p| p.dataset != dataset);
        let mut filters = dataset_filters(file);
        filters.push(Filter::exclude("version", version));
        self.cores.latest.delete_where(&filters).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.flush_files().await?;
        self.flush_latest().await
    }

    async fn flush_files(&mut self) -> Result<()> {
        if self.files_buf.is_empty() {
            return Ok(());
        }
        let docs = std::mem::take(&mut self.files_buf);
        let count = docs.len();
        if self.post_chunk(true, &docs).await? {
            self.stats.files += count;
        }
        Ok(())
    }

    async fn flush_latest(&mut self) -> Result<()> {
        if self.latest_buf.is_empty() {
            return Ok(());
        }
        let docs: Vec<Value> = std::mem::take(&mut self.latest_buf)
            .into_iter()
            .map(|p| p.doc)
            .collect();
        let count = docs.len();
        if self.post_chunk(false, &docs).await? {
            self.stats.latest += count;
        }
        Ok(())
    }

    /// Post one chunk; `Ok(false)` when it failed and was skipped.
    async fn post_chunk(&mut self, all_files: bool, docs: &[Value]) -> Result<bool> {
        let cores = self.cores;
        let core = if all_files { &cores.files } else { &cores.latest };
        match core.post(docs, true).await {
            Ok(()) => {
                debug!(core = core.name(), count = docs.len(), "chunk posted");
                Ok(true)
            }
            Err(e) if self.opts.abort_on_errors => Err(e),
            Err(e) => {
                let first = docs
                    .first()
                    .and_then(|d| d.get(FILE_KEY))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                error!(core = core.name(), first_file = first, error = %e, "chunk failed, skipping");
                self.stats.failed_chunks += 1;
                Ok(false)
            }
        }
    }
}

fn dataset_filters(file: &DrsFile) -> Vec<Filter> {
    let mut filters: Vec<Filter> = file
        .dataset_parts()
        .iter()
        .map(|(k, v)| Filter::term(k, v))
        .collect();
    filters.push(Filter::term("data_type", &file.drs_type));
    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drs::tests::cmip5_toml;
    use crate::solr::MemoryCore;
    use std::sync::Arc;

    const DATASET: &str = "cmip5/output1/MOHC/HadCM3/decadal2008/mon/atmos/Amon/r9i3p1";

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    fn ua_file(root: &Path, version: &str) -> PathBuf {
        root.join(format!(
            "{}/{}/ua/ua_Amon_HadCM3_decadal2008_r9i3p1_200811-201812.nc",
            DATASET, version
        ))
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        drs: DrsConfig,
        files: Arc<MemoryCore>,
        latest: Arc<MemoryCore>,
        cores: IndexCores,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap().join("data");
        std::fs::create_dir_all(&root).unwrap();
        let drs = DrsConfig::from_str(&cmip5_toml(&root)).unwrap();
        let files = Arc::new(MemoryCore::new("files", FILE_KEY));
        let latest = Arc::new(MemoryCore::new("latest", crate::solr::FILE_NO_VERSION_KEY));
        let cores = IndexCores::new(files.clone(), latest.clone());
        Fixture {
            _dir: dir,
            root,
            drs,
            files,
            latest,
            cores,
        }
    }

    #[test]
    fn manifest_format() {
        let fx = fixture();
        touch(&ua_file(&fx.root, "v20110419"));
        let manifest = fx.root.parent().unwrap().join("crawl.txt");
        let stats = dump(None, &fx.root, &manifest, &DumpOptions::default()).unwrap();
        assert_eq!(stats.files, 1);

        let text = std::fs::read_to_string(&manifest).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(format!("crawl_dir\t{}", fx.root.display()).as_str()));
        assert_eq!(lines.next(), Some(""));
        assert_eq!(lines.next(), Some("data"));
        let (path, mtime) = lines.next().unwrap().rsplit_once(',').unwrap();
        assert_eq!(Path::new(path), ua_file(&fx.root, "v20110419"));
        assert!(mtime.parse::<f64>().unwrap() > 0.0);
    }

    #[test]
    fn strict_dump_skips_or_aborts() {
        let fx = fixture();
        touch(&ua_file(&fx.root, "v20110419"));
        touch(&fx.root.join("README"));
        let manifest = fx.root.parent().unwrap().join("crawl.txt");

        let skip = DumpOptions {
            drs_type: Some("cmip5".to_string()),
            strict: StrictMode::Skip,
        };
        let stats = dump(Some(&fx.drs), &fx.root, &manifest, &skip).unwrap();
        assert_eq!(stats, DumpStats { files: 1, skipped: 1 });

        let abort = DumpOptions {
            strict: StrictMode::Abort,
            ..skip
        };
        assert!(dump(Some(&fx.drs), &fx.root, &manifest, &abort).is_err());
    }

    #[tokio::test]
    async fn gzip_round_trip_and_idempotent_reload() {
        let fx = fixture();
        for v in ["v20110419", "v20110719"] {
            touch(&ua_file(&fx.root, v));
        }
        let manifest = fx.root.parent().unwrap().join("crawl.txt.gz");
        dump(None, &fx.root, &manifest, &DumpOptions::default()).unwrap();

        let opts = LoadOptions {
            chunk_size: 1,
            abort_on_errors: true,
        };
        for _ in 0..2 {
            let stats = load(&fx.cores, &fx.drs, &manifest, &opts).await.unwrap();
            assert_eq!(stats.files, 2);
            assert_eq!(fx.files.len(), 2);
            assert_eq!(fx.latest.len(), 1);
            assert_eq!(fx.latest.documents()[0]["version"], "v20110719");
        }
    }

    #[tokio::test]
    async fn truncated_gzip_fails() {
        let fx = fixture();
        touch(&ua_file(&fx.root, "v20110419"));
        let manifest = fx.root.parent().unwrap().join("crawl.gz");
        dump(None, &fx.root, &manifest, &DumpOptions::default()).unwrap();
        let bytes = std::fs::read(&manifest).unwrap();
        std::fs::write(&manifest, &bytes[..bytes.len() - 12]).unwrap();

        assert!(load(&fx.cores, &fx.drs, &manifest, &LoadOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn empty_crawl_changes_nothing() {
        let fx = fixture();
        touch(&ua_file(&fx.root, "v20110419"));
        let full = fx.root.parent().unwrap().join("full.txt");
        dump(None, &fx.root, &full, &DumpOptions::default()).unwrap();
        load(&fx.cores, &fx.drs, &full, &LoadOptions::default())
            .await
            .unwrap();

        let empty_dir = fx.root.join("cmip5/empty");
        std::fs::create_dir_all(&empty_dir).unwrap();
        let empty = fx.root.parent().unwrap().join("empty.txt");
        std::fs::write(&empty, format!("crawl_dir\t{}\n\ndata\n", fx.root.display())).unwrap();
        load(&fx.cores, &fx.drs, &empty, &LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(fx.files.len(), 1);
        assert_eq!(fx.latest.len(), 1);
    }

    #[tokio::test]
    async fn malformed_line_fails() {
        let fx = fixture();
        let manifest = fx.root.parent().unwrap().join("bad.txt");
        std::fs::write(
            &manifest,
            format!("crawl_dir\t{}\n\ndata\n/no/mtime/here\n", fx.root.display()),
        )
        .unwrap();
        let err = load(&fx.cores, &fx.drs, &manifest, &LoadOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("malformed manifest line 4"), "{}", err);
    }

    #[tokio::test]
    async fn unparseable_paths_are_skipped_unless_aborting() {
        let fx = fixture();
        let manifest = fx.root.parent().unwrap().join("odd.txt");
        std::fs::write(
            &manifest,
            format!(
                "crawl_dir\t{root}\n\ndata\n{root}/cmip5/x.nc,1.0\n",
                root = fx.root.display()
            ),
        )
        .unwrap();
        let stats = load(&fx.cores, &fx.drs, &manifest, &LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(stats.skipped, 1);

        let abort = LoadOptions {
            abort_on_errors: true,
            ..LoadOptions::default()
        };
        assert!(load(&fx.cores, &fx.drs, &manifest, &abort).await.is_err());
    }
}
