//! Persistence for the two record families the adaptive core owns
//! (proficiency estimates and per-activity mastery) plus the attempt log and
//! unlock events progression reads.
//!
//! Callers hand a store into every engine operation. Two implementations are
//! provided:
//! - [`SqliteStore`]: rusqlite-backed, migrated schema, one transaction per
//!   read-modify-write
//! - [`MemoryStore`]: process-local maps with a lock per record key

pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use memory::MemoryStore;
pub use migrations::run_migrations;
pub use sqlite::SqliteStore;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::adaptive::mastery::{ActivityKey, ActivityMasteryRecord};
use crate::adaptive::proficiency::ProficiencyRecord;
use crate::adaptive::types::{ActivityAttempt, ActivityType, AttemptSummary, ProficiencyKey};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("lock acquisition failed: {0}")]
    LockError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Keyed access to proficiency records.
pub trait ProficiencyStore: Send + Sync {
    fn get_proficiency(&self, key: &ProficiencyKey) -> StorageResult<Option<ProficiencyRecord>>;

    /// Atomic read-modify-write of one record.
    ///
    /// `update` receives the stored record (or `None`) and returns the record
    /// to persist. Calls for the same key never interleave.
    fn update_proficiency(
        &self,
        key: &ProficiencyKey,
        update: &mut dyn FnMut(Option<ProficiencyRecord>) -> ProficiencyRecord,
    ) -> StorageResult<ProficiencyRecord>;

    /// All item-level records filed under a module for one student.
    fn item_proficiencies(
        &self,
        student_id: &str,
        module_id: &str,
    ) -> StorageResult<Vec<ProficiencyRecord>>;
}

/// Activity mastery, attempt history and unlock events.
pub trait ActivityStore: Send + Sync {
    fn get_mastery(&self, key: &ActivityKey) -> StorageResult<Option<ActivityMasteryRecord>>;

    /// Atomic read-modify-write of one mastery record, same contract as
    /// [`ProficiencyStore::update_proficiency`].
    fn update_mastery(
        &self,
        key: &ActivityKey,
        update: &mut dyn FnMut(Option<ActivityMasteryRecord>) -> ActivityMasteryRecord,
    ) -> StorageResult<ActivityMasteryRecord>;

    fn append_attempt(&self, attempt: &ActivityAttempt) -> StorageResult<()>;

    /// Newest first.
    fn recent_attempts(&self, key: &ActivityKey, limit: usize) -> StorageResult<Vec<ActivityAttempt>>;

    fn attempt_summary(&self, key: &ActivityKey) -> StorageResult<AttemptSummary>;

    /// Persists an unlock event. Returns `true` only the first time.
    fn record_unlock(&self, key: &ActivityKey, at: DateTime<Utc>) -> StorageResult<bool>;

    fn unlocked_activities(&self, student_id: &str, module_id: &str) -> StorageResult<Vec<ActivityType>>;
}

/// Fixed-width UTC timestamps so stored text sorts chronologically.
pub(crate) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_datetime(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("bad timestamp {s:?}: {e}")))
}
