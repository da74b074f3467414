//! Per-activity "hard mode" bookkeeping.
//!
//! One record per (student, module, activity). It remembers the hardest tier
//! ever attempted, the score reached at that tier, and whether the activity
//! was completed on its hardest tier. `completed_hard_mode` only ever goes
//! from false to true.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adaptive::config::ProgressionConfig;
use crate::adaptive::difficulty::LabelScheme;
use crate::adaptive::types::{ActivityAttempt, ActivityType};
use crate::storage::{ActivityStore, StorageResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityKey {
    pub student_id: String,
    pub module_id: String,
    pub activity_type: ActivityType,
}

impl ActivityKey {
    pub fn new(student_id: &str, module_id: &str, activity_type: ActivityType) -> Self {
        Self {
            student_id: student_id.to_string(),
            module_id: module_id.to_string(),
            activity_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityMasteryRecord {
    pub id: String,
    pub key: ActivityKey,
    pub highest_difficulty: String,
    pub highest_difficulty_score: f64,
    pub highest_difficulty_date: DateTime<Utc>,
    pub completed_hard_mode: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivityMasteryRecord {
    pub fn from_attempt(attempt: &ActivityAttempt, hard_mode_score: f64) -> Self {
        let scheme = LabelScheme::for_activity(&attempt.activity_type);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: ActivityKey::new(
                &attempt.student_id,
                &attempt.module_id,
                attempt.activity_type.clone(),
            ),
            highest_difficulty: attempt.difficulty.clone(),
            highest_difficulty_score: attempt.score_percent,
            highest_difficulty_date: attempt.attempted_at,
            completed_hard_mode: scheme.is_top_tier(&attempt.difficulty)
                && attempt.score_percent >= hard_mode_score,
            created_at: attempt.attempted_at,
            updated_at: attempt.attempted_at,
        }
    }

    /// Folds a later attempt in. Returns `true` when this attempt is the one
    /// that completed hard mode.
    pub fn absorb(&mut self, attempt: &ActivityAttempt, hard_mode_score: f64) -> bool {
        let scheme = LabelScheme::for_activity(&self.key.activity_type);

        // ties go to the most recent attempt
        if scheme.rank(&attempt.difficulty) >= scheme.rank(&self.highest_difficulty) {
            self.highest_difficulty = attempt.difficulty.clone();
            self.highest_difficulty_score = attempt.score_percent;
            self.highest_difficulty_date = attempt.attempted_at;
        }
        self.updated_at = attempt.attempted_at;

        let hard_mode = scheme.is_top_tier(&attempt.difficulty) && attempt.score_percent >= hard_mode_score;
        if hard_mode && !self.completed_hard_mode {
            self.completed_hard_mode = true;
            return true;
        }
        false
    }
}

pub struct ActivityMasteryTracker {
    config: ProgressionConfig,
}

impl ActivityMasteryTracker {
    pub fn new(config: ProgressionConfig) -> Self {
        Self { config }
    }

    /// Records one finished activity run: appends the attempt to the history
    /// and then folds it into the mastery record. A failed append leaves the
    /// mastery record untouched.
    pub fn record_attempt<S>(&self, store: &S, attempt: &ActivityAttempt) -> StorageResult<ActivityMasteryRecord>
    where
        S: ActivityStore + ?Sized,
    {
        let key = ActivityKey::new(
            &attempt.student_id,
            &attempt.module_id,
            attempt.activity_type.clone(),
        );
        let hard_mode_score = self.config.hard_mode_score;
        let mut newly_completed = false;

        store.append_attempt(attempt)?;
        let record = store.update_mastery(&key, &mut |existing| match existing {
            Some(mut record) => {
                newly_completed = record.absorb(attempt, hard_mode_score);
                record
            }
            None => {
                let record = ActivityMasteryRecord::from_attempt(attempt, hard_mode_score);
                newly_completed = record.completed_hard_mode;
                record
            }
        })?;

        if newly_completed {
            tracing::info!(
                student_id = %attempt.student_id,
                module_id = %attempt.module_id,
                activity = %attempt.activity_type,
                difficulty = %attempt.difficulty,
                score = attempt.score_percent,
                "hard mode completed"
            );
        } else {
            tracing::debug!(
                student_id = %attempt.student_id,
                activity = %attempt.activity_type,
                highest = %record.highest_difficulty,
                "activity attempt recorded"
            );
        }

        Ok(record)
    }

    pub fn mastery<S>(&self, store: &S, key: &ActivityKey) -> StorageResult<Option<ActivityMasteryRecord>>
    where
        S: ActivityStore + ?Sized,
    {
        store.get_mastery(key)
    }
}
