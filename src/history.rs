//! Per-user record of plugin invocations.
//!
//! Every run gets a `history` row holding its configuration and status.
//! Status changes only move forward (see [`Status::can_become`]); result
//! files and their tags cascade with the row.

use chrono::{NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::db;
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{HistoryEntry, ResultRow, ResultTag, ResultType, Status, TagType};
use crate::parameters::{ConfigRecord, Impact, ParameterDictionary};

/// Storage format of `timestamp` columns; sorts lexically.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
/// Separators between the fields of `YYYY-MM-DDTHH:mm:ss.ffffff`.
const FIELD_SEPARATORS: [char; 6] = ['-', '-', 'T', ':', ':', '.'];
/// Width and fill value of each field.
const FIELD_MINIMUMS: [&str; 7] = ["0000", "01", "01", "00", "00", "00", "000000"];

/// Turn any prefix of `YYYY-MM-DDTHH:mm:ss.ffffff` into a timestamp,
/// filling the missing fields with their minimum.
///
/// Fields are padded one by one: `2024-1` is January, not November. The
/// year needs all four digits and the fraction is padded on the right.
pub fn fill_timestamp(prefix: &str) -> Result<NaiveDateTime> {
    let text = prefix.trim().replacen(' ', "T", 1);
    let invalid = |why: String| Error::Validation(format!("invalid time bound '{}': {}", text, why));

    let mut fields = Vec::with_capacity(FIELD_MINIMUMS.len());
    let mut rest = text.as_str();
    for sep in FIELD_SEPARATORS {
        match rest.split_once(sep) {
            Some((head, tail)) => {
                fields.push(head);
                rest = tail;
            }
            None => break,
        }
    }
    fields.push(rest);

    let mut full = String::with_capacity(26);
    for (i, minimum) in FIELD_MINIMUMS.iter().enumerate() {
        if i > 0 {
            full.push(FIELD_SEPARATORS[i - 1]);
        }
        let Some(field) = fields.get(i) else {
            full.push_str(minimum);
            continue;
        };
        let width = minimum.len();
        if field.is_empty() || field.len() > width || !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid(format!("bad field '{}'", field)));
        }
        match i {
            0 if field.len() != width => {
                return Err(invalid(format!("year '{}' needs four digits", field)));
            }
            6 => full.push_str(&format!("{:0<width$}", field)),
            _ => full.push_str(&format!("{:0>width$}", field)),
        }
    }
    NaiveDateTime::parse_from_str(&full, "%Y-%m-%dT%H:%M:%S%.6f")
        .map_err(|e| invalid(e.to_string()))
}

fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn decode_err(msg: String) -> Error {
    Error::Database(sqlx::Error::Decode(msg.into()))
}

/// Fields of a new history row.
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub tool: &'a str,
    pub version: &'a str,
    pub configuration: &'a ConfigRecord,
    pub uid: &'a str,
    pub status: Status,
    pub slurm_output: Option<&'a str>,
    pub flag: i64,
    pub version_details_id: Option<i64>,
}

/// Filters for [`HistoryStore::get_history`].
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub tool: Option<String>,
    pub limit: Option<i64>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub entry_ids: Vec<i64>,
    pub uid: Option<String>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool(mut self, tool: &str) -> Self {
        self.tool = Some(tool.to_string());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn since(mut self, since: &str) -> Self {
        self.since = Some(since.to_string());
        self
    }

    pub fn until(mut self, until: &str) -> Self {
        self.until = Some(until.to_string());
        self
    }

    pub fn entry_ids(mut self, ids: Vec<i64>) -> Self {
        self.entry_ids = ids;
        self
    }

    pub fn uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_string());
        self
    }
}

/// One output of a run, as passed to [`HistoryStore::store_results`].
#[derive(Debug, Clone)]
pub struct ResultSpec {
    pub kind: ResultType,
    pub preview_path: Option<PathBuf>,
    pub caption: Option<String>,
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    /// Open (and migrate) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        HistoryStore::open(&config.history_db_path()?).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a row; returns its id.
    pub async fn store_history(&self, entry: NewEntry<'_>) -> Result<i64> {
        let now = format_ts(&Utc::now().naive_utc());
        let configuration = serde_json::to_string(entry.configuration)?;
        let result = sqlx::query(
            r#"
            INSERT INTO history (timestamp, tool, version, configuration, slurm_output,
                                 uid, status, flag, version_details_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&now)
        .bind(entry.tool.to_lowercase())
        .bind(entry.version)
        .bind(&configuration)
        .bind(entry.slurm_output)
        .bind(entry.uid)
        .bind(entry.status.as_i64())
        .bind(entry.flag)
        .bind(entry.version_details_id)
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        debug!(id, tool = entry.tool, status = %entry.status, "history entry stored");
        Ok(id)
    }

    /// `not-scheduled → scheduled`, recording the job script path.
    ///
    /// Returns `false` (and changes nothing) for rows in any other status.
    pub async fn schedule_entry(&self, row_id: i64, uid: &str, script_path: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE history SET status = ?, slurm_output = ? WHERE id = ? AND uid = ? AND status = ?",
        )
        .bind(Status::Scheduled.as_i64())
        .bind(script_path)
        .bind(row_id)
        .bind(uid)
        .bind(Status::NotScheduled.as_i64())
        .execute(&self.pool)
        .await?;
        let changed = result.rows_affected() > 0;
        debug!(id = row_id, changed, "schedule entry");
        Ok(changed)
    }

    /// Move a row to `status`, refusing downgrades.
    pub async fn upgrade_status(&self, row_id: i64, uid: &str, status: Status) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let current: Option<i64> =
            sqlx::query_scalar("SELECT status FROM history WHERE id = ? AND uid = ?")
                .bind(row_id)
                .bind(uid)
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.ok_or(Error::EntryNotFound(row_id))?;
        let current = Status::from_i64(current)
            .ok_or_else(|| decode_err(format!("unknown status {} in row {}", current, row_id)))?;
        if !current.can_become(status) {
            return Err(Error::StatusDowngrade {
                id: row_id,
                from: current,
                to: status,
            });
        }
        sqlx::query("UPDATE history SET status = ? WHERE id = ?")
            .bind(status.as_i64())
            .bind(row_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(id = row_id, from = %current, to = %status, "status changed");
        Ok(())
    }

    pub async fn get_entry(&self, row_id: i64) -> Result<HistoryEntry> {
        let row = sqlx::query("SELECT * FROM history WHERE id = ?")
            .bind(row_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::EntryNotFound(row_id))?;
        entry_from_row(&row)
    }

    /// Matching rows, newest id first.
    pub async fn get_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM history WHERE 1 = 1");
        if let Some(uid) = &query.uid {
            qb.push(" AND uid = ").push_bind(uid.clone());
        }
        if let Some(tool) = &query.tool {
            qb.push(" AND tool = ").push_bind(tool.to_lowercase());
        }
        if let Some(since) = &query.since {
            qb.push(" AND timestamp >= ")
                .push_bind(format_ts(&fill_timestamp(since)?));
        }
        if let Some(until) = &query.until {
            qb.push(" AND timestamp <= ")
                .push_bind(format_ts(&fill_timestamp(until)?));
        }
        if !query.entry_ids.is_empty() {
            qb.push(" AND id IN (");
            let mut ids = qb.separated(", ");
            for id in &query.entry_ids {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
        }
        qb.push(" ORDER BY id DESC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Record the output files of a run.
    ///
    /// Preview paths must lie below `preview_root` and are stored relative
    /// to it.
    pub async fn store_results(
        &self,
        row_id: i64,
        results: &BTreeMap<String, ResultSpec>,
        preview_root: Option<&Path>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (output, spec) in results {
            let preview = match &spec.preview_path {
                None => None,
                Some(preview) => Some(relative_preview(preview, preview_root)?),
            };
            let result_id = sqlx::query(
                "INSERT INTO result (history_id, output_file, preview_file, file_type) VALUES (?, ?, ?, ?)",
            )
            .bind(row_id)
            .bind(output)
            .bind(preview)
            .bind(spec.kind.as_i64())
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            if let Some(caption) = &spec.caption {
                sqlx::query("INSERT INTO result_tag (result_id, type, text) VALUES (?, ?, ?)")
                    .bind(result_id)
                    .bind(TagType::Caption as i64)
                    .bind(caption)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        debug!(id = row_id, count = results.len(), "results stored");
        Ok(())
    }

    pub async fn get_result_files(&self, row_id: i64) -> Result<Vec<ResultRow>> {
        let rows = sqlx::query("SELECT * FROM result WHERE history_id = ? ORDER BY id")
            .bind(row_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ResultRow {
                    id: row.try_get("id")?,
                    history_id: row.try_get("history_id")?,
                    output_file: row.try_get("output_file")?,
                    preview_file: row.try_get("preview_file")?,
                    file_type: ResultType::from_i64(row.try_get("file_type")?),
                })
            })
            .collect()
    }

    pub async fn get_result_tags(&self, result_id: i64) -> Result<Vec<ResultTag>> {
        let rows = sqlx::query("SELECT * FROM result_tag WHERE result_id = ? ORDER BY id")
            .bind(result_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ResultTag {
                    id: row.try_get("id")?,
                    result_id: row.try_get("result_id")?,
                    tag_type: TagType::from_i64(row.try_get("type")?),
                    text: row.try_get("text")?,
                })
            })
            .collect()
    }

    /// Delete a row with its results and tags.
    pub async fn delete_entry(&self, row_id: i64, uid: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM history WHERE id = ? AND uid = ?")
            .bind(row_id)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::EntryNotFound(row_id));
        }
        Ok(())
    }

    /// Earlier runs of `tool` whose value-affecting parameters equal
    /// those of `config`.
    pub async fn find_similar_entries(
        &self,
        tool: &str,
        config: &ConfigRecord,
        parameters: &ParameterDictionary,
        uid: Option<&str>,
    ) -> Result<Vec<HistoryEntry>> {
        let mut query = HistoryQuery::new().tool(tool);
        query.uid = uid.map(str::to_string);
        let relevant: Vec<&str> = parameters
            .iter()
            .filter(|p| p.impact == Impact::AffectsValues)
            .map(|p| p.name.as_str())
            .collect();

        let candidates = self.get_history(&query).await?;
        Ok(candidates
            .into_iter()
            .filter(|entry| {
                let stored = entry.config_map();
                relevant.iter().all(|name| {
                    let a = config.get(*name).unwrap_or(&Value::Null);
                    let b = stored.get(*name).unwrap_or(&Value::Null);
                    a == b
                })
            })
            .collect())
    }

    pub async fn get_version_id(
        &self,
        tool: &str,
        version: &str,
        repository: &str,
        internal_version_tool: &str,
    ) -> Result<Option<i64>> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT id FROM version
            WHERE tool = ? AND version = ? AND repository = ? AND internal_version_tool = ?
            ORDER BY id LIMIT 1
            "#,
        )
        .bind(tool.to_lowercase())
        .bind(version)
        .bind(repository)
        .bind(internal_version_tool)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Id of the matching `version` row, inserting it when new.
    pub async fn register_version(
        &self,
        tool: &str,
        version: &str,
        repository: &str,
        internal_version_tool: &str,
        internal_version_api: &str,
    ) -> Result<i64> {
        if let Some(id) = self
            .get_version_id(tool, version, repository, internal_version_tool)
            .await?
        {
            return Ok(id);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO version (timestamp, tool, version, repository,
                                 internal_version_tool, internal_version_api)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(format_ts(&Utc::now().naive_utc()))
        .bind(tool.to_lowercase())
        .bind(version)
        .bind(repository)
        .bind(internal_version_tool)
        .bind(internal_version_api)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Record the declared parameters of a tool version (once).
    pub async fn register_parameters(
        &self,
        tool: &str,
        version_id: i64,
        parameters: &ParameterDictionary,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for p in parameters.iter() {
            let default = match &p.default {
                Some(v) if !v.is_null() => Some(p.format(v)),
                _ => None,
            };
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO parameter
                    (tool, version, mandatory, default_value, parameter_name, parameter_type, impact)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(tool.to_lowercase())
            .bind(version_id)
            .bind(p.mandatory)
            .bind(default)
            .bind(&p.name)
            .bind(p.kind.as_str())
            .bind(p.impact.as_i64())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn add_tool_pull_request(&self, tool: &str, tagged_version: &str, user: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO tool_pull_request (tool, tagged_version, status, timestamp, user) VALUES (?, ?, 'waiting', ?, ?)",
        )
        .bind(tool.to_lowercase())
        .bind(tagged_version)
        .bind(format_ts(&Utc::now().naive_utc()))
        .bind(user)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

fn relative_preview(preview: &Path, root: Option<&Path>) -> Result<String> {
    let root = root.ok_or_else(|| {
        Error::Configuration("preview file given but no preview_path configured".to_string())
    })?;
    preview
        .strip_prefix(root)
        .map(|rel| rel.display().to_string())
        .map_err(|_| {
            Error::Configuration(format!(
                "preview file {} is not below preview_path {}",
                preview.display(),
                root.display()
            ))
        })
}

fn entry_from_row(row: &SqliteRow) -> Result<HistoryEntry> {
    let timestamp: String = row.try_get("timestamp")?;
    let timestamp = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
        .map_err(|e| decode_err(format!("bad timestamp '{}': {}", timestamp, e)))?;
    let status: i64 = row.try_get("status")?;
    let configuration: String = row.try_get("configuration")?;
    Ok(HistoryEntry {
        id: row.try_get("id")?,
        timestamp,
        tool: row.try_get("tool")?,
        version: row.try_get("version")?,
        configuration: serde_json::from_str(&configuration)?,
        slurm_output: row.try_get("slurm_output")?,
        uid: row.try_get("uid")?,
        status: Status::from_i64(status)
            .ok_or_else(|| decode_err(format!("unknown status {}", status)))?,
        flag: row.try_get("flag")?,
        version_details_id: row.try_get("version_details_id")?,
    })
}
