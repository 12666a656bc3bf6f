use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

use crate::error::Result;

/// One pool per database file for the whole process.
fn pools() -> &'static Mutex<HashMap<PathBuf, SqlitePool>> {
    static POOLS: OnceLock<Mutex<HashMap<PathBuf, SqlitePool>>> = OnceLock::new();
    POOLS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cached(db_path: &Path) -> Option<SqlitePool> {
    let guard = match pools().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.get(db_path).filter(|p| !p.is_closed()).cloned()
}

pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(pool) = cached(db_path) {
        return Ok(pool);
    }

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let mut guard = match pools().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    Ok(guard
        .entry(db_path.to_path_buf())
        .or_insert(pool)
        .clone())
}
