//! Search index access.
//!
//! [`IndexCore`] is the narrow interface the crawler and the databrowser
//! use. [`SolrCore`] talks JSON over HTTP to `http://host:port/solr/<core>/`;
//! [`MemoryCore`] keeps documents in a map and evaluates the same filters
//! locally.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// Key field of the all-files core.
pub const FILE_KEY: &str = "file";
/// Key field of the latest core.
pub const FILE_NO_VERSION_KEY: &str = "file_no_version";

/// One filter query: the field must (or, negated, must not) equal one of
/// `values`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: String,
    pub values: Vec<String>,
    pub negate: bool,
    /// Match values as prefixes instead of exact terms.
    pub prefix: bool,
}

impl Filter {
    pub fn new(field: &str, values: Vec<String>) -> Self {
        Self {
            field: field.to_string(),
            values,
            negate: false,
            prefix: false,
        }
    }

    pub fn term(field: &str, value: &str) -> Self {
        Filter::new(field, vec![value.to_string()])
    }

    pub fn exclude(field: &str, value: &str) -> Self {
        Self {
            negate: true,
            ..Filter::term(field, value)
        }
    }

    pub fn starts_with(field: &str, prefix: &str) -> Self {
        Self {
            prefix: true,
            ..Filter::term(field, prefix)
        }
    }

    /// Lucene syntax: `key:a OR key:b`, `-key:a`, `key:pre*`.
    pub fn to_solr(&self) -> String {
        let term = |v: &String| {
            if self.prefix {
                format!("{}:{}*", self.field, escape(v))
            } else {
                format!("{}:{}", self.field, escape(v))
            }
        };
        if self.negate {
            self.values
                .iter()
                .map(|v| format!("-{}", term(v)))
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            self.values.iter().map(term).collect::<Vec<_>>().join(" OR ")
        }
    }

    /// Evaluate against a JSON document.
    pub fn matches(&self, doc: &Value) -> bool {
        let doc_values: Vec<String> = match doc.get(&self.field) {
            Some(Value::Array(items)) => items.iter().map(value_text).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![value_text(other)],
        };
        let hit = self.values.iter().any(|want| {
            doc_values.iter().any(|have| {
                if self.prefix {
                    have.starts_with(want.as_str())
                } else {
                    have == want
                }
            })
        });
        hit != self.negate
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Backslash-escape Lucene special characters.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            '+' | '-' | '&' | '|' | '!' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '"' | '~'
                | '*' | '?' | ':' | '\\' | '/' | ' '
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Split user facets into a free-text query and filters.
///
/// The `text` key becomes `q`; keys ending in `_not_` become negated
/// filters on the stripped field name.
pub fn build_query(facets: &BTreeMap<String, Vec<String>>) -> (Option<String>, Vec<Filter>) {
    let mut q = None;
    let mut filters = Vec::new();
    for (key, values) in facets {
        if values.is_empty() {
            continue;
        }
        if key == "text" {
            q = Some(values.join(" "));
        } else if let Some(field) = key.strip_suffix("_not_") {
            filters.push(Filter {
                negate: true,
                ..Filter::new(field, values.clone())
            });
        } else {
            filters.push(Filter::new(key, values.clone()));
        }
    }
    (q, filters)
}

/// A select request.
#[derive(Debug, Clone)]
pub struct SolrQuery {
    pub q: String,
    pub filters: Vec<Filter>,
    pub facet_fields: Vec<String>,
    pub fields: Vec<String>,
    pub start: usize,
    pub rows: usize,
    pub sort: Option<String>,
}

impl Default for SolrQuery {
    fn default() -> Self {
        Self {
            q: "*:*".to_string(),
            filters: Vec::new(),
            facet_fields: Vec::new(),
            fields: Vec::new(),
            start: 0,
            rows: 10,
            sort: None,
        }
    }
}

/// Result of a select request.
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub num_found: u64,
    pub docs: Vec<Value>,
    /// Facet field → (value, count), as returned by the index.
    pub facets: BTreeMap<String, Vec<(String, u64)>>,
}

/// A single index core.
#[async_trait]
pub trait IndexCore: Send + Sync {
    fn name(&self) -> &str;

    /// Add or replace documents.
    async fn post(&self, docs: &[Value], commit: bool) -> Result<()>;

    /// Delete every document matching all `filters`.
    async fn delete_where(&self, filters: &[Filter]) -> Result<()>;

    async fn query(&self, query: &SolrQuery) -> Result<QueryResponse>;

    /// Names of the fields known to the core.
    async fn fields(&self) -> Result<Vec<String>>;
}

/// Both views of the file catalog.
#[derive(Clone)]
pub struct IndexCores {
    pub files: Arc<dyn IndexCore>,
    pub latest: Arc<dyn IndexCore>,
}

impl IndexCores {
    pub fn new(files: Arc<dyn IndexCore>, latest: Arc<dyn IndexCore>) -> Self {
        Self { files, latest }
    }

    /// HTTP cores named by `solr.core` / `solr.latest_core`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let base = config.solr_base_url()?;
        let (files, latest) = config.solr_core_names();
        Ok(Self {
            files: Arc::new(SolrCore::new(&base, &files)?),
            latest: Arc::new(SolrCore::new(&base, &latest)?),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            files: Arc::new(MemoryCore::new("files", FILE_KEY)),
            latest: Arc::new(MemoryCore::new("latest", FILE_NO_VERSION_KEY)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// HTTP client
// ═══════════════════════════════════════════════════════════════════════

/// Administrative actions on the core admin endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreAction {
    Create,
    Reload,
    Unload,
    Swap,
    Status,
}

impl CoreAction {
    fn as_str(self) -> &'static str {
        match self {
            CoreAction::Create => "CREATE",
            CoreAction::Reload => "RELOAD",
            CoreAction::Unload => "UNLOAD",
            CoreAction::Swap => "SWAP",
            CoreAction::Status => "STATUS",
        }
    }
}

/// A core of a Solr server.
pub struct SolrCore {
    client: reqwest::Client,
    base_url: String,
    core: String,
}

impl SolrCore {
    /// `base_url` is the server root, e.g. `http://localhost:8983/solr`.
    pub fn new(base_url: &str, core: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            core: core.to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.core, endpoint)
    }

    /// `POST update/json?commit=true` with a JSON body.
    async fn update(&self, body: &Value, commit: bool) -> Result<()> {
        let url = self.url("update/json");
        let resp = self
            .client
            .post(&url)
            .query(&[("commit", commit.to_string())])
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Index(format!("{}: {}", url, e)))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Index(format!("{} returned {}: {}", url, status, text)));
        }
        Ok(())
    }

    /// GET `endpoint` with `wt=json`, failing on a non-zero
    /// `responseHeader.status`.
    pub async fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        self.fetch_json(&self.url(endpoint), params).await
    }

    async fn fetch_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        let resp = self
            .client
            .get(url)
            .query(params)
            .query(&[("wt", "json")])
            .send()
            .await
            .map_err(|e| Error::Index(format!("{}: {}", url, e)))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::Index(format!("{} returned {} with invalid JSON: {}", url, status, e)))?;
        let header_status = body
            .pointer("/responseHeader/status")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if !status.is_success() || header_status != 0 {
            let msg = body
                .pointer("/error/msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(Error::Index(format!("{} failed ({}): {}", url, status, msg)));
        }
        Ok(body)
    }

    /// Delete by raw Lucene query.
    pub async fn delete(&self, query: &str) -> Result<()> {
        debug!(core = %self.core, query, "delete by query");
        self.update(&json!({ "delete": { "query": query } }), true)
            .await
    }

    /// Field names from the luke handler.
    pub async fn get_solr_fields(&self) -> Result<Vec<String>> {
        let body = self
            .get_json("admin/luke", &[("numTerms", "0".to_string())])
            .await?;
        Ok(body
            .get("fields")
            .and_then(Value::as_object)
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Forward an action to `<base>/admin/cores`.
    pub async fn core_admin(&self, action: CoreAction, extra: &[(&str, String)]) -> Result<Value> {
        let mut params = vec![
            ("action", action.as_str().to_string()),
            ("core", self.core.clone()),
        ];
        if action == CoreAction::Create {
            params.push(("name", self.core.clone()));
        }
        params.extend(extra.iter().cloned());
        let url = format!("{}/admin/cores", self.base_url);
        self.fetch_json(&url, &params).await
    }

    pub async fn create(&self, instance_dir: &str) -> Result<Value> {
        self.core_admin(CoreAction::Create, &[("instanceDir", instance_dir.to_string())])
            .await
    }

    pub async fn reload(&self) -> Result<Value> {
        self.core_admin(CoreAction::Reload, &[]).await
    }

    pub async fn unload(&self) -> Result<Value> {
        self.core_admin(CoreAction::Unload, &[]).await
    }

    pub async fn swap(&self, other: &str) -> Result<Value> {
        self.core_admin(CoreAction::Swap, &[("other", other.to_string())])
            .await
    }

    pub async fn status(&self) -> Result<Value> {
        self.core_admin(CoreAction::Status, &[]).await
    }
}

#[async_trait]
impl IndexCore for SolrCore {
    fn name(&self) -> &str {
        &self.core
    }

    async fn post(&self, docs: &[Value], commit: bool) -> Result<()> {
        debug!(core = %self.core, count = docs.len(), "posting documents");
        self.update(&Value::Array(docs.to_vec()), commit).await
    }

    async fn delete_where(&self, filters: &[Filter]) -> Result<()> {
        let query = if filters.is_empty() {
            "*:*".to_string()
        } else {
            filters
                .iter()
                .map(|f| format!("({})", f.to_solr()))
                .collect::<Vec<_>>()
                .join(" AND ")
        };
        self.delete(&query).await
    }

    async fn query(&self, query: &SolrQuery) -> Result<QueryResponse> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", query.q.clone()),
            ("q.op", "AND".to_string()),
            ("start", query.start.to_string()),
            ("rows", query.rows.to_string()),
        ];
        for f in &query.filters {
            params.push(("fq", f.to_solr()));
        }
        if !query.fields.is_empty() {
            params.push(("fl", query.fields.join(",")));
        }
        if let Some(sort) = &query.sort {
            params.push(("sort", sort.clone()));
        }
        if !query.facet_fields.is_empty() {
            params.push(("facet", "true".to_string()));
            params.push(("facet.mincount", "1".to_string()));
            params.push(("facet.limit", "-1".to_string()));
            params.push(("facet.sort", "index".to_string()));
            for field in &query.facet_fields {
                params.push(("facet.field", field.clone()));
            }
        }

        let body = self.get_json("select", &params).await?;
        let num_found = body
            .pointer("/response/numFound")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let docs = body
            .pointer("/response/docs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut facets = BTreeMap::new();
        if let Some(fields) = body
            .pointer("/facet_counts/facet_fields")
            .and_then(Value::as_object)
        {
            for (field, flat) in fields {
                let flat = flat.as_array().cloned().unwrap_or_default();
                let pairs = flat
                    .chunks(2)
                    .filter_map(|pair| match pair {
                        [value, count] => Some((value_text(value), count.as_u64().unwrap_or(0))),
                        _ => None,
                    })
                    .collect();
                facets.insert(field.clone(), pairs);
            }
        }

        Ok(QueryResponse {
            num_found,
            docs,
            facets,
        })
    }

    async fn fields(&self) -> Result<Vec<String>> {
        self.get_solr_fields().await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory core
// ═══════════════════════════════════════════════════════════════════════

/// Documents held in memory, keyed by `key_field`.
pub struct MemoryCore {
    name: String,
    key_field: String,
    docs: RwLock<BTreeMap<String, Value>>,
}

impl MemoryCore {
    pub fn new(name: &str, key_field: &str) -> Self {
        Self {
            name: name.to_string(),
            key_field: key_field.to_string(),
            docs: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>> {
        match self.docs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        match self.docs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshot of all documents, in key order.
    pub fn documents(&self) -> Vec<Value> {
        self.read().values().cloned().collect()
    }
}

fn text_matches(q: &str, doc: &Value) -> bool {
    if q == "*:*" || q.trim().is_empty() {
        return true;
    }
    let Some(obj) = doc.as_object() else {
        return false;
    };
    q.split_whitespace().all(|word| {
        let word = word.to_lowercase();
        obj.values()
            .any(|v| value_text(v).to_lowercase().contains(&word))
    })
}

/// `field [asc|desc][, field [asc|desc]]*` → `(field, descending)` pairs.
fn parse_sort(sort: &str) -> Result<Vec<(String, bool)>> {
    sort.split(',')
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .map(|clause| {
            let mut words = clause.split_whitespace();
            let field = words.next().unwrap_or_default().to_string();
            let descending = match words.next().map(str::to_lowercase).as_deref() {
                None | Some("asc") => false,
                Some("desc") => true,
                Some(other) => {
                    return Err(Error::Index(format!(
                        "bad sort direction '{}' in '{}'",
                        other, sort
                    )))
                }
            };
            if words.next().is_some() {
                return Err(Error::Index(format!("bad sort clause '{}'", clause)));
            }
            Ok((field, descending))
        })
        .collect()
}

/// Numbers compare numerically, everything else by text; missing sorts first.
fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => x.to_string().cmp(&y.to_string()),
        },
        (Some(x), Some(y)) => value_text(x).cmp(&value_text(y)),
    }
}

#[async_trait]
impl IndexCore for MemoryCore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn post(&self, docs: &[Value], _commit: bool) -> Result<()> {
        let mut store = self.write();
        for doc in docs {
            let key = doc
                .get(&self.key_field)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::Index(format!(
                        "document without '{}' posted to {}",
                        self.key_field, self.name
                    ))
                })?;
            store.insert(key.to_string(), doc.clone());
        }
        Ok(())
    }

    async fn delete_where(&self, filters: &[Filter]) -> Result<()> {
        self.write()
            .retain(|_, doc| !filters.iter().all(|f| f.matches(doc)));
        Ok(())
    }

    async fn query(&self, query: &SolrQuery) -> Result<QueryResponse> {
        let store = self.read();
        let mut hits: Vec<&Value> = store
            .values()
            .filter(|doc| text_matches(&query.q, doc))
            .filter(|doc| query.filters.iter().all(|f| f.matches(doc)))
            .collect();
        hits.sort_by_key(|doc| doc.get(FILE_KEY).map(value_text).unwrap_or_default());
        if let Some(sort) = &query.sort {
            let keys = parse_sort(sort)?;
            hits.sort_by(|a, b| {
                keys.iter()
                    .map(|(field, descending)| {
                        let order = compare_field(a.get(field), b.get(field));
                        if *descending {
                            order.reverse()
                        } else {
                            order
                        }
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }

        let mut facets = BTreeMap::new();
        for field in &query.facet_fields {
            let mut counts: BTreeMap<String, u64> = BTreeMap::new();
            for doc in &hits {
                let values = match doc.get(field) {
                    Some(Value::Array(items)) => items.iter().map(value_text).collect(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(v) => vec![value_text(v)],
                };
                for v in values {
                    *counts.entry(v).or_default() += 1;
                }
            }
            facets.insert(field.clone(), counts.into_iter().collect());
        }

        let docs = hits
            .iter()
            .skip(query.start)
            .take(query.rows)
            .map(|doc| {
                if query.fields.is_empty() {
                    (*doc).clone()
                } else {
                    let picked: serde_json::Map<String, Value> = query
                        .fields
                        .iter()
                        .filter_map(|f| doc.get(f).map(|v| (f.clone(), v.clone())))
                        .collect();
                    Value::Object(picked)
                }
            })
            .collect();

        Ok(QueryResponse {
            num_found: hits.len() as u64,
            docs,
            facets,
        })
    }

    async fn fields(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .read()
            .values()
            .filter_map(Value::as_object)
            .flat_map(|o| o.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn doc(file: &str, variable: &str) -> Value {
        json!({"file": file, "file_no_version": file, "variable": variable})
    }

    #[test]
    fn filter_syntax() {
        let f = Filter::new("variable", vec!["ua".to_string(), "tauu".to_string()]);
        assert_eq!(f.to_solr(), "variable:ua OR variable:tauu");
        assert_eq!(Filter::exclude("version", "v1").to_solr(), "-version:v1");
        assert_eq!(
            Filter::starts_with("file", "/data/x").to_solr(),
            "file:\\/data\\/x*"
        );
    }

    #[test]
    fn build_query_splits_text_and_negation() {
        let mut facets = BTreeMap::new();
        facets.insert("text".to_string(), vec!["hadcm3".to_string()]);
        facets.insert("model_not_".to_string(), vec!["mpi".to_string()]);
        facets.insert("variable".to_string(), vec!["ua".to_string()]);
        let (q, filters) = build_query(&facets);
        assert_eq!(q.as_deref(), Some("hadcm3"));
        assert_eq!(filters.len(), 2);
        assert!(filters.iter().any(|f| f.field == "model" && f.negate));
    }

    #[tokio::test]
    async fn memory_core_filters_and_facets() {
        let core = MemoryCore::new("files", FILE_KEY);
        core.post(
            &[doc("/b", "ua"), doc("/a", "tas"), doc("/c", "ua")],
            true,
        )
        .await
        .unwrap();

        let resp = core
            .query(&SolrQuery {
                filters: vec![Filter::term("variable", "ua")],
                facet_fields: vec!["variable".to_string()],
                ..SolrQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.num_found, 2);
        assert_eq!(resp.docs[0]["file"], "/b");
        assert_eq!(resp.facets["variable"], vec![("ua".to_string(), 2)]);

        core.delete_where(&[Filter::starts_with("file", "/c")])
            .await
            .unwrap();
        assert_eq!(core.len(), 2);
        core.delete_where(&[Filter::exclude("variable", "tas")])
            .await
            .unwrap();
        assert_eq!(core.len(), 1);
    }

    #[tokio::test]
    async fn memory_core_sorts_before_paging() {
        let core = MemoryCore::new("files", FILE_KEY);
        let versioned = |file: &str, version: &str, size: u64| {
            json!({"file": file, "version": version, "size": size})
        };
        core.post(
            &[
                versioned("/a", "v20110419", 3),
                versioned("/b", "v20120101", 1),
                versioned("/c", "v20100101", 2),
            ],
            true,
        )
        .await
        .unwrap();

        let latest = core
            .query(&SolrQuery {
                rows: 1,
                sort: Some("version desc".to_string()),
                ..SolrQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(latest.num_found, 3);
        assert_eq!(latest.docs.len(), 1);
        assert_eq!(latest.docs[0]["version"], "v20120101");

        let by_size = core
            .query(&SolrQuery {
                sort: Some("size asc, file desc".to_string()),
                ..SolrQuery::default()
            })
            .await
            .unwrap();
        let files: Vec<&str> = by_size.docs.iter().filter_map(|d| d["file"].as_str()).collect();
        assert_eq!(files, vec!["/b", "/c", "/a"]);

        let err = core
            .query(&SolrQuery {
                sort: Some("version sideways".to_string()),
                ..SolrQuery::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Index(_)));
    }

    #[tokio::test]
    async fn memory_core_rejects_unkeyed_docs() {
        let core = MemoryCore::new("latest", FILE_NO_VERSION_KEY);
        let err = core.post(&[json!({"file": "/x"})], true).await.unwrap_err();
        assert!(matches!(err, Error::Index(_)));
    }

    #[tokio::test]
    async fn solr_post_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/solr/files/update/json"))
            .and(query_param("commit", "true"))
            .and(body_json(json!({"delete": {"query": "(file:\\/data*)"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"responseHeader": {"status": 0}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/solr/files/update/json"))
            .and(body_json(json!([doc("/a", "ua")])))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let core = SolrCore::new(&format!("{}/solr", server.uri()), "files").unwrap();
        core.delete_where(&[Filter::starts_with("file", "/data")])
            .await
            .unwrap();
        core.post(&[doc("/a", "ua")], true).await.unwrap();
    }

    #[tokio::test]
    async fn solr_query_parses_docs_and_facets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/solr/latest/select"))
            .and(query_param("fq", "variable:ua"))
            .and(query_param("q.op", "AND"))
            .and(query_param("wt", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "responseHeader": {"status": 0},
                "response": {"numFound": 1, "docs": [{"file": "/a"}]},
                "facet_counts": {"facet_fields": {"model": ["hadcm3", 1, "mpi", 0]}}
            })))
            .mount(&server)
            .await;

        let core = SolrCore::new(&format!("{}/solr", server.uri()), "latest").unwrap();
        let resp = core
            .query(&SolrQuery {
                filters: vec![Filter::term("variable", "ua")],
                facet_fields: vec!["model".to_string()],
                ..SolrQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.num_found, 1);
        assert_eq!(resp.docs[0]["file"], "/a");
        assert_eq!(
            resp.facets["model"],
            vec![("hadcm3".to_string(), 1), ("mpi".to_string(), 0)]
        );
    }

    #[tokio::test]
    async fn solr_error_status_is_index_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/solr/files/admin/luke"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "responseHeader": {"status": 400},
                "error": {"msg": "bad request"}
            })))
            .mount(&server)
            .await;

        let core = SolrCore::new(&format!("{}/solr", server.uri()), "files").unwrap();
        let err = core.get_solr_fields().await.unwrap_err();
        assert!(matches!(err, Error::Index(_)));
        assert!(err.to_string().contains("bad request"));
    }

    #[tokio::test]
    async fn core_admin_targets_admin_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/solr/admin/cores"))
            .and(query_param("action", "SWAP"))
            .and(query_param("core", "files"))
            .and(query_param("other", "files_new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"responseHeader": {"status": 0}})))
            .expect(1)
            .mount(&server)
            .await;

        let core = SolrCore::new(&format!("{}/solr", server.uri()), "files").unwrap();
        core.swap("files_new").await.unwrap();
    }
}
