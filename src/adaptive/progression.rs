//! Activity sequencing.
//!
//! Stages run in [`ActivityType::SEQUENCE`] order. A stage opens once the
//! stage before it has been completed on its hardest tier; an opened stage is
//! written to the store and never closes again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adaptive::config::{AdaptiveConfig, ProgressionConfig};
use crate::adaptive::mastery::ActivityKey;
use crate::adaptive::policy::RecommendationPolicy;
use crate::adaptive::types::{ActivityType, AttemptSummary, NextActivityDecision};
use crate::storage::{ActivityStore, ProficiencyStore, StorageResult};

/// Continue-vs-advance verdict for the activity a student is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueDecision {
    pub should_continue: bool,
    pub reason: String,
}

impl ContinueDecision {
    fn keep(reason: impl Into<String>) -> Self {
        Self {
            should_continue: true,
            reason: reason.into(),
        }
    }

    fn advance(reason: impl Into<String>) -> Self {
        Self {
            should_continue: false,
            reason: reason.into(),
        }
    }
}

pub struct ProgressionEngine {
    config: ProgressionConfig,
    gate: RecommendationPolicy,
}

impl ProgressionEngine {
    pub fn new(config: &AdaptiveConfig) -> Self {
        Self {
            config: config.progression.clone(),
            gate: RecommendationPolicy::new(config),
        }
    }

    /// Unlocked stages in sequence order.
    ///
    /// Walks the hard-mode gates from the first stage and persists every gate
    /// it crosses, then merges in stages unlocked earlier so a later regression
    /// never closes one.
    pub fn unlocked_activities<S>(&self, store: &S, student_id: &str, module_id: &str) -> StorageResult<Vec<ActivityType>>
    where
        S: ActivityStore + ?Sized,
    {
        self.unlocked_activities_at(store, student_id, module_id, Utc::now())
    }

    pub fn unlocked_activities_at<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<ActivityType>>
    where
        S: ActivityStore + ?Sized,
    {
        let mut open = vec![false; ActivityType::SEQUENCE.len()];
        open[0] = true;

        for (i, pair) in ActivityType::SEQUENCE.windows(2).enumerate() {
            let (gate, next) = (&pair[0], &pair[1]);
            let passed = store
                .get_mastery(&ActivityKey::new(student_id, module_id, gate.clone()))?
                .map(|record| record.completed_hard_mode)
                .unwrap_or(false);
            if !passed {
                break;
            }

            open[i + 1] = true;
            let key = ActivityKey::new(student_id, module_id, next.clone());
            if store.record_unlock(&key, now)? {
                tracing::info!(student_id, module_id, activity = %next, "activity unlocked");
            }
        }

        for activity in store.unlocked_activities(student_id, module_id)? {
            if let Some(i) = activity.position() {
                open[i] = true;
            }
        }

        Ok(ActivityType::SEQUENCE
            .iter()
            .zip(open)
            .filter(|(_, is_open)| *is_open)
            .map(|(activity, _)| activity.clone())
            .collect())
    }

    pub fn should_continue_current_activity<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        activity: &ActivityType,
    ) -> StorageResult<ContinueDecision>
    where
        S: ProficiencyStore + ActivityStore + ?Sized,
    {
        self.should_continue_at(store, student_id, module_id, activity, Utc::now())
    }

    /// Struggling students always stay; otherwise the module-level mastery
    /// gate at the stage's own threshold decides.
    pub fn should_continue_at<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        activity: &ActivityType,
        now: DateTime<Utc>,
    ) -> StorageResult<ContinueDecision>
    where
        S: ProficiencyStore + ActivityStore + ?Sized,
    {
        let key = ActivityKey::new(student_id, module_id, activity.clone());
        let recent = store.recent_attempts(&key, self.config.recent_window)?;
        if recent.is_empty() {
            return Ok(ContinueDecision::keep("First attempt - keep practicing!"));
        }

        let average = recent.iter().map(|a| a.score_percent).sum::<f64>() / recent.len() as f64;
        if average < self.config.struggling_average {
            return Ok(ContinueDecision::keep(
                "Keep practicing - you're building important skills!",
            ));
        }

        let threshold = self.config.unlock.for_activity(activity);
        if self.gate.check_mastery_at(store, student_id, module_id, threshold, now)? {
            let reason = match activity.next_in_sequence() {
                Some(next) => format!("Great work! Ready for {}", next.display_name()),
                None => "Module complete! You've mastered every activity.".to_string(),
            };
            return Ok(ContinueDecision::advance(reason));
        }

        Ok(ContinueDecision::keep(
            "You're making progress - keep going to build mastery!",
        ))
    }

    pub fn next_activity<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        current: Option<&ActivityType>,
    ) -> StorageResult<NextActivityDecision>
    where
        S: ProficiencyStore + ActivityStore + ?Sized,
    {
        self.next_activity_at(store, student_id, module_id, current, Utc::now())
    }

    pub fn next_activity_at<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        current: Option<&ActivityType>,
        now: DateTime<Utc>,
    ) -> StorageResult<NextActivityDecision>
    where
        S: ProficiencyStore + ActivityStore + ?Sized,
    {
        let unlocked = self.unlocked_activities_at(store, student_id, module_id, now)?;
        let summaries = ActivityType::SEQUENCE
            .iter()
            .map(|activity| store.attempt_summary(&ActivityKey::new(student_id, module_id, activity.clone())))
            .collect::<StorageResult<Vec<AttemptSummary>>>()?;
        let summary_of = |activity: &ActivityType| activity.position().map(|i| summaries[i]).unwrap_or_default();

        let next_is_fresh = current
            .and_then(ActivityType::next_in_sequence)
            .filter(|next| unlocked.contains(next))
            .map(|next| summary_of(&next).attempts == 0)
            .unwrap_or(false);

        let (activity_type, reason, is_new) =
            self.choose(store, student_id, module_id, current, &unlocked, &summary_of, now)?;

        let progressed = unlocked
            .iter()
            .filter(|activity| {
                summary_of(*activity)
                    .best_percentage
                    .map_or(false, |best| best >= self.config.progress_best_score)
            })
            .count();
        let total = ActivityType::SEQUENCE.len();
        let completed = summaries.iter().filter(|s| s.best_percentage.is_some()).count();

        let decision = NextActivityDecision {
            activity_type,
            reason,
            is_new,
            progress_percentage: progressed as f64 / total as f64 * 100.0,
            unlocked_new: next_is_fresh,
            total_activities: total as u32,
            completed_activities: completed as u32,
        };

        tracing::debug!(
            student_id,
            module_id,
            next = %decision.activity_type,
            is_new = decision.is_new,
            progress = decision.progress_percentage,
            "next activity"
        );

        Ok(decision)
    }

    #[allow(clippy::too_many_arguments)]
    fn choose<S, F>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        current: Option<&ActivityType>,
        unlocked: &[ActivityType],
        summary_of: &F,
        now: DateTime<Utc>,
    ) -> StorageResult<(ActivityType, String, bool)>
    where
        S: ProficiencyStore + ActivityStore + ?Sized,
        F: Fn(&ActivityType) -> AttemptSummary,
    {
        if let Some(current) = current.filter(|c| unlocked.contains(c)) {
            let verdict = self.should_continue_at(store, student_id, module_id, current, now)?;
            if verdict.should_continue {
                return Ok((current.clone(), verdict.reason, false));
            }
            if let Some(next) = current.next_in_sequence().filter(|next| unlocked.contains(next)) {
                let is_new = summary_of(&next).attempts == 0;
                return Ok((next, verdict.reason, is_new));
            }
        }

        for activity in unlocked {
            let summary = summary_of(activity);
            if summary.attempts == 0 {
                return Ok((
                    activity.clone(),
                    format!("Let's try {}!", activity.display_name()),
                    true,
                ));
            }
            if summary
                .best_percentage
                .map_or(false, |best| best < self.config.practice_best_score)
            {
                return Ok((activity.clone(), "Keep practicing to build mastery!".to_string(), false));
            }
        }

        let last = unlocked
            .last()
            .cloned()
            .unwrap_or_else(|| ActivityType::SEQUENCE[0].clone());
        Ok((
            last,
            "Great progress! Keep practicing to maintain your skills.".to_string(),
            false,
        ))
    }
}
