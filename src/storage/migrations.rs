//! Versioned schema migrations.
//!
//! Each migration runs in its own transaction and is recorded in
//! `schema_migrations`; already-applied versions are skipped.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::storage::{format_datetime, StorageError, StorageResult};

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

const INIT_SCHEMA: &str = include_str!("schema.sql");

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i32,
    pub name: String,
    pub sql: String,
}

impl Migration {
    pub fn new(version: i32, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// All migrations, ordered by version.
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration::new(1, "proficiency and activity mastery", INIT_SCHEMA),
        Migration::new(
            2,
            "attempt history and unlock events",
            r#"
            CREATE TABLE IF NOT EXISTS activity_attempts (
                attempt_id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                module_id TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                difficulty TEXT NOT NULL,
                score_percent REAL NOT NULL,
                attempted_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attempts_student_module_activity
                ON activity_attempts(student_id, module_id, activity_type, attempted_at);

            CREATE TABLE IF NOT EXISTS activity_unlocks (
                student_id TEXT NOT NULL,
                module_id TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                sequence_position INTEGER NOT NULL,
                unlocked_at TEXT NOT NULL,
                PRIMARY KEY (student_id, module_id, activity_type)
            );
            "#,
        ),
    ]
}

/// Versions recorded in `schema_migrations`, creating the table on first use.
pub fn applied_versions(conn: &Connection) -> StorageResult<BTreeSet<i32>> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )
    .map_err(|e| StorageError::Migration(format!("cannot create schema_migrations: {e}")))?;

    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<BTreeSet<i32>, _>>()?;
    Ok(versions)
}

/// Applies every pending migration and returns the highest applied version.
pub fn run_migrations(conn: &Connection) -> StorageResult<i32> {
    let mut applied = applied_versions(conn)?;
    tracing::debug!(
        applied = applied.len(),
        target = CURRENT_SCHEMA_VERSION,
        "checking schema migrations"
    );

    for migration in get_migrations() {
        if applied.contains(&migration.version) {
            continue;
        }
        tracing::info!(version = migration.version, name = %migration.name, "applying migration");
        apply(conn, &migration).map_err(|e| {
            tracing::error!(version = migration.version, error = %e, "migration failed");
            e
        })?;
        applied.insert(migration.version);
    }

    Ok(applied.last().copied().unwrap_or(0))
}

/// Schema change and its bookkeeping row commit together or not at all.
fn apply(conn: &Connection, migration: &Migration) -> StorageResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(&migration.sql)
        .map_err(|e| StorageError::Migration(format!("v{} {}: {e}", migration.version, migration.name)))?;
    tx.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        params![migration.version, migration.name, format_datetime(Utc::now())],
    )?;
    tx.commit()?;
    Ok(())
}
