//! SQLite-backed store.
//!
//! One connection behind a mutex. Every read-modify-write runs in an
//! `IMMEDIATE` transaction while the lock is held, so two evidence updates for
//! the same record can never interleave.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::adaptive::mastery::{ActivityKey, ActivityMasteryRecord};
use crate::adaptive::proficiency::ProficiencyRecord;
use crate::adaptive::types::{
    ActivityAttempt, ActivityType, AttemptSummary, ProficiencyKey, ProficiencyLevel,
};
use crate::storage::{
    format_datetime, migrations, parse_datetime, ActivityStore, ProficiencyStore, StorageError,
    StorageResult,
};

const PROFICIENCY_COLUMNS: &str = "proficiency_id, student_id, level, domain, module_id, item_id, \
    alpha, beta, mean_ability, confidence, learning_rate, forgetting_rate, sample_count, \
    last_updated, created_at";

const MASTERY_COLUMNS: &str = "mastery_id, student_id, module_id, activity_type, \
    highest_difficulty, highest_difficulty_score, highest_difficulty_date, \
    completed_hard_mode, created_at, updated_at";

pub struct SqliteStore {
    connection: Mutex<Connection>,
    db_path: String,
}

impl SqliteStore {
    /// Opens (or creates) a database file and migrates it.
    pub fn open<P: AsRef<Path>>(db_path: P) -> StorageResult<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        let connection = Connection::open(&db_path)?;

        connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;

        Self::with_connection(connection, path_str)
    }

    /// In-memory database, mainly for tests.
    pub fn in_memory() -> StorageResult<Self> {
        let connection = Connection::open_in_memory()?;
        Self::with_connection(connection, ":memory:".to_string())
    }

    fn with_connection(connection: Connection, db_path: String) -> StorageResult<Self> {
        let version = migrations::run_migrations(&connection)?;
        tracing::info!(path = %db_path, version, "sqlite store ready");

        Ok(Self {
            connection: Mutex::new(connection),
            db_path,
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn get_connection(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(StorageError::InvalidData(message)),
    )
}

fn get_datetime(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_datetime(&raw).map_err(|e| {
        let idx = row.as_ref().column_index(column).unwrap_or(0);
        conversion_error(idx, e.to_string())
    })
}

fn proficiency_from_row(row: &Row) -> rusqlite::Result<ProficiencyRecord> {
    let level_raw: String = row.get("level")?;
    let level = ProficiencyLevel::parse(&level_raw)
        .ok_or_else(|| conversion_error(2, format!("unknown proficiency level {level_raw:?}")))?;

    Ok(ProficiencyRecord {
        id: row.get("proficiency_id")?,
        key: ProficiencyKey {
            student_id: row.get("student_id")?,
            level,
            domain: row.get("domain")?,
            module_id: row.get("module_id")?,
            item_id: row.get("item_id")?,
        },
        alpha: row.get("alpha")?,
        beta: row.get("beta")?,
        mean_ability: row.get("mean_ability")?,
        confidence: row.get("confidence")?,
        learning_rate: row.get("learning_rate")?,
        forgetting_rate: row.get("forgetting_rate")?,
        sample_count: row.get("sample_count")?,
        last_updated: get_datetime(row, "last_updated")?,
        created_at: get_datetime(row, "created_at")?,
    })
}

fn mastery_from_row(row: &Row) -> rusqlite::Result<ActivityMasteryRecord> {
    let activity: String = row.get("activity_type")?;
    Ok(ActivityMasteryRecord {
        id: row.get("mastery_id")?,
        key: ActivityKey {
            student_id: row.get("student_id")?,
            module_id: row.get("module_id")?,
            activity_type: ActivityType::parse(&activity),
        },
        highest_difficulty: row.get("highest_difficulty")?,
        highest_difficulty_score: row.get("highest_difficulty_score")?,
        highest_difficulty_date: get_datetime(row, "highest_difficulty_date")?,
        completed_hard_mode: row.get::<_, i32>("completed_hard_mode")? != 0,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

fn attempt_from_row(row: &Row) -> rusqlite::Result<ActivityAttempt> {
    let activity: String = row.get("activity_type")?;
    Ok(ActivityAttempt {
        id: row.get("attempt_id")?,
        student_id: row.get("student_id")?,
        module_id: row.get("module_id")?,
        activity_type: ActivityType::parse(&activity),
        difficulty: row.get("difficulty")?,
        score_percent: row.get("score_percent")?,
        attempted_at: get_datetime(row, "attempted_at")?,
    })
}

fn select_proficiency(conn: &Connection, key: &ProficiencyKey) -> StorageResult<Option<ProficiencyRecord>> {
    let (student_id, level, domain_key, module_key, item_key) = key.identity();
    let sql = format!(
        "SELECT {PROFICIENCY_COLUMNS} FROM student_proficiencies \
         WHERE student_id = ?1 AND level = ?2 AND domain_key = ?3 AND module_key = ?4 AND item_key = ?5"
    );
    let record = conn
        .query_row(
            &sql,
            params![student_id, level.as_str(), domain_key, module_key, item_key],
            proficiency_from_row,
        )
        .optional()?;
    Ok(record)
}

fn upsert_proficiency(conn: &Connection, record: &ProficiencyRecord) -> StorageResult<()> {
    let (student_id, level, domain_key, module_key, item_key) = record.key.identity();
    conn.execute(
        r#"
        INSERT INTO student_proficiencies (
            proficiency_id, student_id, level, domain, module_id, item_id,
            domain_key, module_key, item_key,
            alpha, beta, mean_ability, confidence, learning_rate, forgetting_rate,
            sample_count, last_updated, created_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18
        )
        ON CONFLICT(student_id, level, domain_key, module_key, item_key) DO UPDATE SET
            domain = COALESCE(excluded.domain, domain),
            alpha = excluded.alpha,
            beta = excluded.beta,
            mean_ability = excluded.mean_ability,
            confidence = excluded.confidence,
            learning_rate = excluded.learning_rate,
            forgetting_rate = excluded.forgetting_rate,
            sample_count = excluded.sample_count,
            last_updated = excluded.last_updated
        "#,
        params![
            record.id,
            student_id,
            level.as_str(),
            record.key.domain,
            record.key.module_id,
            record.key.item_id,
            domain_key,
            module_key,
            item_key,
            record.alpha,
            record.beta,
            record.mean_ability,
            record.confidence,
            record.learning_rate,
            record.forgetting_rate,
            record.sample_count,
            format_datetime(record.last_updated),
            format_datetime(record.created_at),
        ],
    )?;
    Ok(())
}

fn select_mastery(conn: &Connection, key: &ActivityKey) -> StorageResult<Option<ActivityMasteryRecord>> {
    let sql = format!(
        "SELECT {MASTERY_COLUMNS} FROM activity_mastery \
         WHERE student_id = ?1 AND module_id = ?2 AND activity_type = ?3"
    );
    let record = conn
        .query_row(
            &sql,
            params![key.student_id, key.module_id, key.activity_type.as_str()],
            mastery_from_row,
        )
        .optional()?;
    Ok(record)
}

fn upsert_mastery(conn: &Connection, record: &ActivityMasteryRecord) -> StorageResult<()> {
    conn.execute(
        r#"
        INSERT INTO activity_mastery (
            mastery_id, student_id, module_id, activity_type,
            highest_difficulty, highest_difficulty_score, highest_difficulty_date,
            completed_hard_mode, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(student_id, module_id, activity_type) DO UPDATE SET
            highest_difficulty = excluded.highest_difficulty,
            highest_difficulty_score = excluded.highest_difficulty_score,
            highest_difficulty_date = excluded.highest_difficulty_date,
            completed_hard_mode = MAX(completed_hard_mode, excluded.completed_hard_mode),
            updated_at = excluded.updated_at
        "#,
        params![
            record.id,
            record.key.student_id,
            record.key.module_id,
            record.key.activity_type.as_str(),
            record.highest_difficulty,
            record.highest_difficulty_score,
            format_datetime(record.highest_difficulty_date),
            record.completed_hard_mode as i32,
            format_datetime(record.created_at),
            format_datetime(record.updated_at),
        ],
    )?;
    Ok(())
}

impl ProficiencyStore for SqliteStore {
    fn get_proficiency(&self, key: &ProficiencyKey) -> StorageResult<Option<ProficiencyRecord>> {
        let conn = self.get_connection()?;
        select_proficiency(&conn, key)
    }

    fn update_proficiency(
        &self,
        key: &ProficiencyKey,
        update: &mut dyn FnMut(Option<ProficiencyRecord>) -> ProficiencyRecord,
    ) -> StorageResult<ProficiencyRecord> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let record = update(select_proficiency(&tx, key)?);
        upsert_proficiency(&tx, &record)?;
        tx.commit()?;

        Ok(record)
    }

    fn item_proficiencies(
        &self,
        student_id: &str,
        module_id: &str,
    ) -> StorageResult<Vec<ProficiencyRecord>> {
        let conn = self.get_connection()?;
        let sql = format!(
            "SELECT {PROFICIENCY_COLUMNS} FROM student_proficiencies \
             WHERE student_id = ?1 AND level = 'item' AND module_key = ?2 ORDER BY item_key"
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![student_id, module_id], proficiency_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl ActivityStore for SqliteStore {
    fn get_mastery(&self, key: &ActivityKey) -> StorageResult<Option<ActivityMasteryRecord>> {
        let conn = self.get_connection()?;
        select_mastery(&conn, key)
    }

    fn update_mastery(
        &self,
        key: &ActivityKey,
        update: &mut dyn FnMut(Option<ActivityMasteryRecord>) -> ActivityMasteryRecord,
    ) -> StorageResult<ActivityMasteryRecord> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let record = update(select_mastery(&tx, key)?);
        upsert_mastery(&tx, &record)?;
        tx.commit()?;

        Ok(record)
    }

    fn append_attempt(&self, attempt: &ActivityAttempt) -> StorageResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            r#"
            INSERT INTO activity_attempts (
                attempt_id, student_id, module_id, activity_type,
                difficulty, score_percent, attempted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                attempt.id,
                attempt.student_id,
                attempt.module_id,
                attempt.activity_type.as_str(),
                attempt.difficulty,
                attempt.score_percent,
                format_datetime(attempt.attempted_at),
            ],
        )?;
        Ok(())
    }

    fn recent_attempts(&self, key: &ActivityKey, limit: usize) -> StorageResult<Vec<ActivityAttempt>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT attempt_id, student_id, module_id, activity_type,
                   difficulty, score_percent, attempted_at
            FROM activity_attempts
            WHERE student_id = ?1 AND module_id = ?2 AND activity_type = ?3
            ORDER BY attempted_at DESC, rowid DESC
            LIMIT ?4
            "#,
        )?;
        let attempts = stmt
            .query_map(
                params![
                    key.student_id,
                    key.module_id,
                    key.activity_type.as_str(),
                    limit as i64
                ],
                attempt_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attempts)
    }

    fn attempt_summary(&self, key: &ActivityKey) -> StorageResult<AttemptSummary> {
        let conn = self.get_connection()?;
        let (attempts, best_percentage) = conn.query_row(
            r#"
            SELECT COUNT(*), MAX(score_percent)
            FROM activity_attempts
            WHERE student_id = ?1 AND module_id = ?2 AND activity_type = ?3
            "#,
            params![key.student_id, key.module_id, key.activity_type.as_str()],
            |row| Ok((row.get::<_, u32>(0)?, row.get::<_, Option<f64>>(1)?)),
        )?;
        Ok(AttemptSummary {
            attempts,
            best_percentage,
        })
    }

    fn record_unlock(&self, key: &ActivityKey, at: DateTime<Utc>) -> StorageResult<bool> {
        let conn = self.get_connection()?;
        let position = key
            .activity_type
            .position()
            .map(|p| p as i64)
            .unwrap_or(i64::MAX);
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO activity_unlocks (
                student_id, module_id, activity_type, sequence_position, unlocked_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                key.student_id,
                key.module_id,
                key.activity_type.as_str(),
                position,
                format_datetime(at),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn unlocked_activities(&self, student_id: &str, module_id: &str) -> StorageResult<Vec<ActivityType>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT activity_type FROM activity_unlocks
            WHERE student_id = ?1 AND module_id = ?2
            ORDER BY sequence_position, unlocked_at
            "#,
        )?;
        let activities = stmt
            .query_map(params![student_id, module_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .iter()
            .map(|name| ActivityType::parse(name))
            .collect();
        Ok(activities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::config::{ConfidenceNorms, PriorConfig};

    fn record(key: ProficiencyKey) -> ProficiencyRecord {
        ProficiencyRecord::with_prior(
            key,
            &PriorConfig::default(),
            &ConfidenceNorms::default(),
            Utc::now(),
        )
    }

    #[test]
    fn test_proficiency_upsert_and_read_back() {
        let store = SqliteStore::in_memory().unwrap();
        let key = ProficiencyKey::item("student-1", Some("reading"), "r003.1", "cat");
        let norms = ConfidenceNorms::default();

        store
            .update_proficiency(&key, &mut |existing| {
                let mut rec = existing.unwrap_or_else(|| record(key.clone()));
                rec.apply_evidence(true, &norms, Utc::now());
                rec
            })
            .unwrap();

        let stored = store.get_proficiency(&key).unwrap().unwrap();
        assert_eq!(stored.alpha, 2.0);
        assert_eq!(stored.sample_count, 1);
        assert_eq!(stored.key.item_id.as_deref(), Some("cat"));

        let items = store.item_proficiencies("student-1", "r003.1").unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_module_lookup_ignores_domain() {
        let store = SqliteStore::in_memory().unwrap();
        let with_domain = ProficiencyKey::module("student-1", Some("reading"), "r003.1");

        store
            .update_proficiency(&with_domain, &mut |_| record(with_domain.clone()))
            .unwrap();

        let by_module = ProficiencyKey::module("student-1", None, "r003.1");
        let found = store.get_proficiency(&by_module).unwrap().unwrap();
        assert_eq!(found.key.domain.as_deref(), Some("reading"));
    }

    #[test]
    fn test_hard_mode_never_cleared_by_upsert() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let attempt = ActivityAttempt::new("s1", "m1", ActivityType::Spelling, "hard", 95.0, now);
        let key = ActivityKey::new("s1", "m1", ActivityType::Spelling);

        store
            .update_mastery(&key, &mut |_| ActivityMasteryRecord::from_attempt(&attempt, 80.0))
            .unwrap();
        store
            .update_mastery(&key, &mut |existing| {
                let mut rec = existing.unwrap_or_else(|| ActivityMasteryRecord::from_attempt(&attempt, 80.0));
                rec.completed_hard_mode = false;
                rec
            })
            .unwrap();

        assert!(store.get_mastery(&key).unwrap().unwrap().completed_hard_mode);
    }

    #[test]
    fn test_attempt_summary_and_ordering() {
        let store = SqliteStore::in_memory().unwrap();
        let key = ActivityKey::new("s1", "m1", ActivityType::MultipleChoice);
        let empty = store.attempt_summary(&key).unwrap();
        assert_eq!(empty.attempts, 0);
        assert_eq!(empty.best_percentage, None);

        let start = Utc::now();
        for (i, score) in [50.0, 90.0, 70.0].iter().enumerate() {
            let at = start + chrono::Duration::seconds(i as i64);
            store
                .append_attempt(&ActivityAttempt::new("s1", "m1", ActivityType::MultipleChoice, "3", *score, at))
                .unwrap();
        }

        let summary = store.attempt_summary(&key).unwrap();
        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.best_percentage, Some(90.0));

        let recent = store.recent_attempts(&key, 2).unwrap();
        assert_eq!(recent.iter().map(|a| a.score_percent).collect::<Vec<_>>(), vec![70.0, 90.0]);
    }

    #[test]
    fn test_unlocks_ordered_by_sequence() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        assert!(store
            .record_unlock(&ActivityKey::new("s1", "m1", ActivityType::Spelling), now)
            .unwrap());
        assert!(store
            .record_unlock(&ActivityKey::new("s1", "m1", ActivityType::FillInTheBlank), now)
            .unwrap());
        assert!(!store
            .record_unlock(&ActivityKey::new("s1", "m1", ActivityType::Spelling), now)
            .unwrap());

        assert_eq!(
            store.unlocked_activities("s1", "m1").unwrap(),
            vec![ActivityType::FillInTheBlank, ActivityType::Spelling]
        );
    }
}
