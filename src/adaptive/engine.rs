//! Entry point for callers: evidence in, decisions out.
//!
//! The engine holds configuration only. Every operation takes the store it
//! should read and write, so one engine can serve any number of stores and
//! tests can pin `now`.

use chrono::{DateTime, Utc};

use crate::adaptive::config::AdaptiveConfig;
use crate::adaptive::mastery::{ActivityKey, ActivityMasteryRecord, ActivityMasteryTracker};
use crate::adaptive::policy::RecommendationPolicy;
use crate::adaptive::proficiency::ProficiencyRecord;
use crate::adaptive::progression::{ContinueDecision, ProgressionEngine};
use crate::adaptive::types::{
    ActivityAttempt, ActivityType, EvidenceCounts, ItemRef, ItemResult, NextActivityDecision,
    ProficiencyKey, Recommendation,
};
use crate::storage::{ActivityStore, ProficiencyStore, StorageResult};

pub struct AdaptiveEngine {
    config: AdaptiveConfig,
    policy: RecommendationPolicy,
    tracker: ActivityMasteryTracker,
    progression: ProgressionEngine,
}

impl Default for AdaptiveEngine {
    fn default() -> Self {
        Self::new(AdaptiveConfig::default())
    }
}

impl AdaptiveEngine {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            policy: RecommendationPolicy::new(&config),
            tracker: ActivityMasteryTracker::new(config.progression.clone()),
            progression: ProgressionEngine::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Creates prior-only records for the domain, the module and each item.
    /// Existing records are left as they are.
    pub fn initialize_proficiencies<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        domain: &str,
        items: &[ItemRef],
    ) -> StorageResult<()>
    where
        S: ProficiencyStore + ?Sized,
    {
        self.initialize_proficiencies_at(store, student_id, module_id, domain, items, Utc::now())
    }

    pub fn initialize_proficiencies_at<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        domain: &str,
        items: &[ItemRef],
        now: DateTime<Utc>,
    ) -> StorageResult<()>
    where
        S: ProficiencyStore + ?Sized,
    {
        if student_id.is_empty() || module_id.is_empty() {
            tracing::warn!(student_id, module_id, "initialize skipped: missing student or module id");
            return Ok(());
        }

        let domain = non_empty(domain);
        let mut keys = Vec::with_capacity(items.len() + 2);
        if let Some(domain) = domain {
            keys.push(ProficiencyKey::domain(student_id, domain));
        }
        keys.push(ProficiencyKey::module(student_id, domain, module_id));
        keys.extend(
            items
                .iter()
                .filter(|item| !item.id.is_empty())
                .map(|item| ProficiencyKey::item(student_id, domain, module_id, &item.id)),
        );

        for key in &keys {
            self.ensure_record(store, key, now)?;
        }

        tracing::debug!(student_id, module_id, records = keys.len(), "proficiencies initialized");
        Ok(())
    }

    /// Folds one graded batch into the item, module and domain estimates.
    ///
    /// Items are updated per answer; module and domain each take the batch
    /// totals. An empty batch changes nothing.
    pub fn record_evidence<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        domain: &str,
        results: &[ItemResult],
    ) -> StorageResult<()>
    where
        S: ProficiencyStore + ?Sized,
    {
        self.record_evidence_at(store, student_id, module_id, domain, results, Utc::now())
    }

    pub fn record_evidence_at<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        domain: &str,
        results: &[ItemResult],
        now: DateTime<Utc>,
    ) -> StorageResult<()>
    where
        S: ProficiencyStore + ?Sized,
    {
        if results.is_empty() {
            return Ok(());
        }
        if student_id.is_empty() || module_id.is_empty() {
            tracing::warn!(student_id, module_id, "evidence dropped: missing student or module id");
            return Ok(());
        }

        let domain = non_empty(domain);
        for result in results {
            if result.item.is_empty() {
                tracing::warn!(student_id, module_id, "evidence for unnamed item skipped at item level");
                continue;
            }
            let key = ProficiencyKey::item(student_id, domain, module_id, &result.item);
            self.fold(store, &key, EvidenceCounts::single(result.correct), now)?;
        }

        let counts = EvidenceCounts::from_results(results);
        let module = self.fold(store, &ProficiencyKey::module(student_id, domain, module_id), counts, now)?;
        if let Some(domain) = domain {
            self.fold(store, &ProficiencyKey::domain(student_id, domain), counts, now)?;
        }

        tracing::debug!(
            student_id,
            module_id,
            correct = counts.correct,
            incorrect = counts.incorrect,
            module_ability = module.mean_ability,
            module_confidence = module.confidence,
            "evidence recorded"
        );
        Ok(())
    }

    pub fn recommend<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        activity: &ActivityType,
        is_optional: bool,
    ) -> StorageResult<Recommendation>
    where
        S: ProficiencyStore + ?Sized,
    {
        self.policy.recommend(store, student_id, module_id, activity, is_optional)
    }

    pub fn recommend_at<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        activity: &ActivityType,
        is_optional: bool,
        now: DateTime<Utc>,
    ) -> StorageResult<Recommendation>
    where
        S: ProficiencyStore + ?Sized,
    {
        self.policy
            .recommend_at(store, student_id, module_id, activity, is_optional, now)
    }

    /// `threshold` defaults to the configured mastery threshold.
    pub fn check_mastery<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        threshold: Option<f64>,
    ) -> StorageResult<bool>
    where
        S: ProficiencyStore + ?Sized,
    {
        self.check_mastery_at(store, student_id, module_id, threshold, Utc::now())
    }

    pub fn check_mastery_at<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        threshold: Option<f64>,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>
    where
        S: ProficiencyStore + ?Sized,
    {
        let threshold = threshold.unwrap_or(self.config.mastery.threshold);
        self.policy
            .check_mastery_at(store, student_id, module_id, threshold, now)
    }

    pub fn record_activity_attempt<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        activity: ActivityType,
        difficulty: &str,
        score_percent: f64,
    ) -> StorageResult<Option<ActivityMasteryRecord>>
    where
        S: ActivityStore + ?Sized,
    {
        self.record_activity_attempt_at(store, student_id, module_id, activity, difficulty, score_percent, Utc::now())
    }

    /// Stores one activity run and returns the updated mastery record, or
    /// `None` when the student or module id is missing and nothing was stored.
    #[allow(clippy::too_many_arguments)]
    pub fn record_activity_attempt_at<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        activity: ActivityType,
        difficulty: &str,
        score_percent: f64,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<ActivityMasteryRecord>>
    where
        S: ActivityStore + ?Sized,
    {
        if student_id.is_empty() || module_id.is_empty() {
            tracing::warn!(student_id, module_id, %activity, "attempt dropped: missing student or module id");
            return Ok(None);
        }

        let score_percent = if score_percent.is_finite() { score_percent } else { 0.0 };
        let attempt = ActivityAttempt::new(student_id, module_id, activity, difficulty, score_percent, now);
        self.tracker.record_attempt(store, &attempt).map(Some)
    }

    pub fn activity_mastery<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        activity: ActivityType,
    ) -> StorageResult<Option<ActivityMasteryRecord>>
    where
        S: ActivityStore + ?Sized,
    {
        self.tracker
            .mastery(store, &ActivityKey::new(student_id, module_id, activity))
    }

    pub fn get_next_activity<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        current: Option<&ActivityType>,
    ) -> StorageResult<NextActivityDecision>
    where
        S: ProficiencyStore + ActivityStore + ?Sized,
    {
        self.progression
            .next_activity(store, student_id, module_id, current)
    }

    pub fn get_next_activity_at<S>(
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
        self.progression
            .next_activity_at(store, student_id, module_id, current, now)
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
        self.progression
            .should_continue_current_activity(store, student_id, module_id, activity)
    }

    pub fn unlocked_activities<S>(&self, store: &S, student_id: &str, module_id: &str) -> StorageResult<Vec<ActivityType>>
    where
        S: ActivityStore + ?Sized,
    {
        self.progression.unlocked_activities(store, student_id, module_id)
    }

    pub fn domain_ability<S>(&self, store: &S, student_id: &str, domain: &str) -> StorageResult<f64>
    where
        S: ProficiencyStore + ?Sized,
    {
        self.policy
            .domain_ability_at(store, student_id, domain, Utc::now())
    }

    pub fn domain_ability_at<S>(
        &self,
        store: &S,
        student_id: &str,
        domain: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<f64>
    where
        S: ProficiencyStore + ?Sized,
    {
        self.policy.domain_ability_at(store, student_id, domain, now)
    }

    fn fresh_record(&self, key: &ProficiencyKey, now: DateTime<Utc>) -> ProficiencyRecord {
        ProficiencyRecord::with_prior(key.clone(), &self.config.prior, &self.config.confidence, now)
    }

    fn ensure_record<S>(&self, store: &S, key: &ProficiencyKey, now: DateTime<Utc>) -> StorageResult<ProficiencyRecord>
    where
        S: ProficiencyStore + ?Sized,
    {
        store.update_proficiency(key, &mut |existing| {
            existing.unwrap_or_else(|| self.fresh_record(key, now))
        })
    }

    fn fold<S>(
        &self,
        store: &S,
        key: &ProficiencyKey,
        counts: EvidenceCounts,
        now: DateTime<Utc>,
    ) -> StorageResult<ProficiencyRecord>
    where
        S: ProficiencyStore + ?Sized,
    {
        let norms = &self.config.confidence;
        store.update_proficiency(key, &mut |existing| {
            let mut record = existing.unwrap_or_else(|| self.fresh_record(key, now));
            record.apply_counts(counts, norms, now);
            record
        })
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_initialize_is_idempotent() {
        let store = MemoryStore::new();
        let engine = AdaptiveEngine::default();
        let items = vec![ItemRef::new("cat"), ItemRef::new("dog"), ItemRef::new("")];

        engine
            .initialize_proficiencies(&store, "s1", "r003.1", "reading", &items)
            .unwrap();
        engine
            .record_evidence(&store, "s1", "r003.1", "reading", &[ItemResult::new("cat", true)])
            .unwrap();
        engine
            .initialize_proficiencies(&store, "s1", "r003.1", "reading", &items)
            .unwrap();

        let cat = store
            .get_proficiency(&ProficiencyKey::item("s1", Some("reading"), "r003.1", "cat"))
            .unwrap()
            .unwrap();
        assert_eq!(cat.sample_count, 1);
        assert_eq!(store.item_proficiencies("s1", "r003.1").unwrap().len(), 2);
        assert!(store
            .get_proficiency(&ProficiencyKey::domain("s1", "reading"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let store = MemoryStore::new();
        let engine = AdaptiveEngine::default();
        engine.record_evidence(&store, "s1", "r003.1", "reading", &[]).unwrap();
        assert!(store
            .get_proficiency(&ProficiencyKey::module("s1", None, "r003.1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_levels_receive_same_counts() {
        let store = MemoryStore::new();
        let engine = AdaptiveEngine::default();
        let results = vec![
            ItemResult::new("cat", true),
            ItemResult::new("cat", false),
            ItemResult::new("dog", true),
        ];
        engine
            .record_evidence(&store, "s1", "r003.1", "reading", &results)
            .unwrap();

        let module = store
            .get_proficiency(&ProficiencyKey::module("s1", None, "r003.1"))
            .unwrap()
            .unwrap();
        let domain = store
            .get_proficiency(&ProficiencyKey::domain("s1", "reading"))
            .unwrap()
            .unwrap();
        let cat = store
            .get_proficiency(&ProficiencyKey::item("s1", None, "r003.1", "cat"))
            .unwrap()
            .unwrap();

        for record in [&module, &domain] {
            assert_eq!(record.alpha, 3.0);
            assert_eq!(record.beta, 2.0);
            assert_eq!(record.sample_count, 3);
        }
        assert_eq!(cat.alpha, 2.0);
        assert_eq!(cat.beta, 2.0);
    }

    #[test]
    fn test_missing_domain_skips_domain_record() {
        let store = MemoryStore::new();
        let engine = AdaptiveEngine::default();
        engine
            .record_evidence(&store, "s1", "r003.1", "  ", &[ItemResult::new("cat", true)])
            .unwrap();
        assert!(store
            .get_proficiency(&ProficiencyKey::domain("s1", ""))
            .unwrap()
            .is_none());
        assert_eq!(engine.domain_ability(&store, "s1", "reading").unwrap(), 0.5);
    }

    #[test]
    fn test_check_mastery_default_threshold() {
        let store = MemoryStore::new();
        let engine = AdaptiveEngine::default();
        let results: Vec<_> = (0..12).map(|i| ItemResult::new(format!("w{i}"), true)).collect();
        engine
            .record_evidence(&store, "s1", "r003.1", "reading", &results)
            .unwrap();

        assert!(engine.check_mastery(&store, "s1", "r003.1", None).unwrap());
        assert!(!engine.check_mastery(&store, "s1", "r003.1", Some(0.99)).unwrap());
    }

    #[test]
    fn test_attempt_without_ids_is_dropped() {
        let store = MemoryStore::new();
        let engine = AdaptiveEngine::default();

        for (student, module) in [("", "r003.1"), ("s1", ""), ("", "")] {
            let record = engine
                .record_activity_attempt(&store, student, module, ActivityType::MultipleChoice, "5", 90.0)
                .unwrap();
            assert!(record.is_none());
        }

        assert_eq!(
            engine.unlocked_activities(&store, "", "").unwrap(),
            vec![ActivityType::MultipleChoice]
        );
        assert!(store.unlocked_activities("", "").unwrap().is_empty());
        let key = ActivityKey::new("", "r003.1", ActivityType::MultipleChoice);
        assert_eq!(store.attempt_summary(&key).unwrap().attempts, 0);
    }
}
