//! Faceted search over the file catalog.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::drs::DrsConfig;
use crate::error::{Error, Result};
use crate::solr::{build_query, IndexCore, IndexCores, SolrQuery, FILE_KEY};

pub const DEFAULT_ROWS: usize = 1000;

/// Facet constraints plus paging.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Facet → accepted values (OR-ed); keys ending in `_not_` exclude.
    pub facets: BTreeMap<String, Vec<String>>,
    /// Search the latest core instead of all versions.
    pub latest_only: bool,
    pub start: usize,
    pub rows: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            facets: BTreeMap::new(),
            latest_only: true,
            start: 0,
            rows: DEFAULT_ROWS,
        }
    }
}

impl SearchRequest {
    /// Build from `facet=value` tokens; repeated facets accumulate.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut req = SearchRequest::default();
        for token in tokens {
            let token = token.as_ref();
            let (key, value) = token.split_once('=').ok_or_else(|| {
                Error::Validation(format!("expected facet=value, got '{}'", token))
            })?;
            req.facet(key.trim(), value.trim());
        }
        Ok(req)
    }

    pub fn facet(&mut self, key: &str, value: &str) -> &mut Self {
        self.facets
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    fn to_query(&self) -> SolrQuery {
        let (q, filters) = build_query(&self.facets);
        SolrQuery {
            q: q.unwrap_or_else(|| "*:*".to_string()),
            filters,
            start: self.start,
            rows: self.rows,
            ..SolrQuery::default()
        }
    }
}

/// Query API over both index cores.
pub struct Databrowser {
    cores: IndexCores,
    drs: Option<DrsConfig>,
}

impl Databrowser {
    pub fn new(cores: IndexCores, drs: Option<DrsConfig>) -> Self {
        Self { cores, drs }
    }

    fn core(&self, latest_only: bool) -> &Arc<dyn IndexCore> {
        if latest_only {
            &self.cores.latest
        } else {
            &self.cores.files
        }
    }

    /// Matching file paths, ordered by path.
    pub async fn search_files(&self, req: &SearchRequest) -> Result<Vec<String>> {
        let query = SolrQuery {
            fields: vec![FILE_KEY.to_string()],
            sort: Some(format!("{} asc", FILE_KEY)),
            ..req.to_query()
        };
        let resp = self.core(req.latest_only).query(&query).await?;
        Ok(resp
            .docs
            .iter()
            .filter_map(|d| d.get(FILE_KEY).and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Number of matching files.
    pub async fn count(&self, req: &SearchRequest) -> Result<u64> {
        let query = SolrQuery {
            rows: 0,
            ..req.to_query()
        };
        Ok(self.core(req.latest_only).query(&query).await?.num_found)
    }

    /// Value counts of `fields` among the matching files. Without fields,
    /// every known attribute is faceted.
    pub async fn facet_values(
        &self,
        req: &SearchRequest,
        fields: &[String],
    ) -> Result<BTreeMap<String, Vec<(String, u64)>>> {
        let facet_fields = if fields.is_empty() {
            self.attributes(None)?
        } else {
            fields.to_vec()
        };
        let query = SolrQuery {
            rows: 0,
            facet_fields,
            ..req.to_query()
        };
        Ok(self.core(req.latest_only).query(&query).await?.facets)
    }

    /// Searchable facet names, in DRS layout order.
    pub fn attributes(&self, drs_type: Option<&str>) -> Result<Vec<String>> {
        let drs = self
            .drs
            .as_ref()
            .ok_or_else(|| Error::Configuration("no DRS configuration loaded".to_string()))?;
        drs.facet_names(drs_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> Databrowser {
        let cores = IndexCores::in_memory();
        let docs: Vec<Value> = [
            ("/d/ua.nc", "ua", "v2"),
            ("/d/tas.nc", "tas", "v2"),
            ("/d/old/ua.nc", "ua", "v1"),
        ]
        .iter()
        .map(|(f, v, ver)| json!({"file": f, "file_no_version": f, "variable": v, "version": ver}))
        .collect();
        cores.files.post(&docs, true).await.unwrap();
        cores.latest.post(&docs[..2], true).await.unwrap();
        Databrowser::new(cores, None)
    }

    #[tokio::test]
    async fn latest_only_by_default() {
        let db = seeded().await;
        let req = SearchRequest::from_tokens(["variable=ua"]).unwrap();
        assert_eq!(db.search_files(&req).await.unwrap(), vec!["/d/ua.nc"]);

        let all = SearchRequest {
            latest_only: false,
            ..req
        };
        assert_eq!(
            db.search_files(&all).await.unwrap(),
            vec!["/d/old/ua.nc", "/d/ua.nc"]
        );
        assert_eq!(db.count(&all).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn facet_counts_and_exclusion() {
        let db = seeded().await;
        let mut req = SearchRequest {
            latest_only: false,
            ..SearchRequest::default()
        };
        let facets = db
            .facet_values(&req, &["variable".to_string()])
            .await
            .unwrap();
        assert_eq!(
            facets["variable"],
            vec![("tas".to_string(), 1), ("ua".to_string(), 2)]
        );

        req.facet("variable_not_", "ua");
        assert_eq!(db.search_files(&req).await.unwrap(), vec!["/d/tas.nc"]);
    }

    #[test]
    fn tokens_need_equals() {
        assert!(SearchRequest::from_tokens(["variable"]).is_err());
    }

    #[tokio::test]
    async fn attributes_need_drs() {
        let db = seeded().await;
        assert!(matches!(db.attributes(None), Err(Error::Configuration(_))));
    }
}
