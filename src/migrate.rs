use sqlx::SqlitePool;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Tool versions (plugin repository + commit)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            tool TEXT NOT NULL,
            version TEXT NOT NULL,
            repository TEXT NOT NULL,
            internal_version_tool TEXT NOT NULL,
            internal_version_api TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per plugin invocation
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            tool TEXT NOT NULL,
            version TEXT NOT NULL,
            configuration TEXT NOT NULL DEFAULT '{}',
            slurm_output TEXT,
            uid TEXT NOT NULL,
            status INTEGER NOT NULL,
            flag INTEGER NOT NULL DEFAULT 0,
            version_details_id INTEGER,
            FOREIGN KEY (version_details_id) REFERENCES version(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS result (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            history_id INTEGER NOT NULL,
            output_file TEXT NOT NULL,
            preview_file TEXT,
            file_type INTEGER NOT NULL,
            FOREIGN KEY (history_id) REFERENCES history(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS result_tag (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            result_id INTEGER NOT NULL,
            type INTEGER NOT NULL,
            text TEXT NOT NULL,
            FOREIGN KEY (result_id) REFERENCES result(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Declared parameters per tool version
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parameter (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tool TEXT NOT NULL,
            version INTEGER NOT NULL,
            mandatory INTEGER NOT NULL,
            default_value TEXT,
            parameter_name TEXT NOT NULL,
            parameter_type TEXT NOT NULL,
            impact INTEGER NOT NULL,
            UNIQUE(tool, version, parameter_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tool_pull_request (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tool TEXT NOT NULL,
            tagged_version TEXT NOT NULL,
            status TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            user TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_uid_tool ON history(uid, tool)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_result_history_id ON result(history_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_result_tag_result_id ON result_tag(result_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_version_tool ON version(tool, version)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect(&dir.path().join("h.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec!["history", "parameter", "result", "result_tag", "tool_pull_request", "version"]
        );
    }
}
