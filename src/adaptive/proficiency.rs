//! Beta-Binomial proficiency estimate
//!
//! Each record holds Beta(alpha, beta) evidence accumulators:
//! - correct answer -> alpha + 1, incorrect answer -> beta + 1
//! - mean ability = alpha / (alpha + beta)
//! - confidence grows with alpha + beta, normalised per level
//!
//! Forgetting is applied at read time only. The stored record is never
//! touched by a read, so the same `now` always yields the same value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adaptive::config::{ConfidenceNorms, PriorConfig};
use crate::adaptive::types::{EvidenceCounts, ProficiencyKey, ProficiencyLevel};

/// Neutral ability that forgetting pulls toward.
pub const DECAY_TARGET: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProficiencyRecord {
    pub id: String,
    pub key: ProficiencyKey,
    pub alpha: f64,
    pub beta: f64,
    pub mean_ability: f64,
    pub confidence: f64,
    /// Reserved; not read by any decision.
    pub learning_rate: f64,
    pub forgetting_rate: f64,
    pub sample_count: u32,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ProficiencyRecord {
    /// Fresh record holding only the prior.
    pub fn with_prior(
        key: ProficiencyKey,
        prior: &PriorConfig,
        norms: &ConfidenceNorms,
        now: DateTime<Utc>,
    ) -> Self {
        let alpha = prior.alpha.max(f64::EPSILON);
        let beta = prior.beta.max(f64::EPSILON);
        let mut record = Self {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            alpha,
            beta,
            mean_ability: 0.0,
            confidence: 0.0,
            learning_rate: prior.learning_rate,
            forgetting_rate: prior.forgetting_rate,
            sample_count: 0,
            last_updated: now,
            created_at: now,
        };
        record.refresh_derived(norms);
        record
    }

    pub fn level(&self) -> ProficiencyLevel {
        self.key.level
    }

    /// Folds a single graded answer into the record.
    pub fn apply_evidence(&mut self, correct: bool, norms: &ConfidenceNorms, now: DateTime<Utc>) {
        self.apply_counts(EvidenceCounts::single(correct), norms, now);
    }

    /// Folds a batch of answers; an empty batch leaves the record untouched.
    pub fn apply_counts(&mut self, counts: EvidenceCounts, norms: &ConfidenceNorms, now: DateTime<Utc>) {
        if counts.is_empty() {
            return;
        }
        self.alpha += counts.correct as f64;
        self.beta += counts.incorrect as f64;
        self.sample_count += counts.total();
        self.last_updated = now;
        self.refresh_derived(norms);
    }

    /// Ability after forgetting decay, without mutating the record.
    pub fn effective_ability(&self, now: DateTime<Utc>) -> f64 {
        decayed_ability(
            self.mean_ability,
            self.forgetting_rate,
            elapsed_days(self.last_updated, now),
        )
    }

    pub fn total_evidence(&self) -> f64 {
        self.alpha + self.beta
    }

    fn refresh_derived(&mut self, norms: &ConfidenceNorms) {
        let total = self.alpha + self.beta;
        self.mean_ability = if total > 0.0 { self.alpha / total } else { DECAY_TARGET };
        let norm = norms.for_level(self.key.level);
        self.confidence = if norm > 0.0 { (total / norm).min(1.0) } else { 1.0 };
    }
}

/// Whole days between `since` and `now`; clock skew counts as zero.
pub fn elapsed_days(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days().max(0)
}

/// Exponential decay of `ability` toward [`DECAY_TARGET`].
pub fn decayed_ability(ability: f64, forgetting_rate: f64, days: i64) -> f64 {
    if days <= 0 {
        return ability;
    }
    let decay = (-forgetting_rate.max(0.0) * days as f64).exp();
    ability * decay + DECAY_TARGET * (1.0 - decay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn norms() -> ConfidenceNorms {
        ConfidenceNorms::default()
    }

    fn module_record(now: DateTime<Utc>) -> ProficiencyRecord {
        ProficiencyRecord::with_prior(
            ProficiencyKey::module("student-1", Some("reading"), "r003.1"),
            &PriorConfig::default(),
            &norms(),
            now,
        )
    }

    #[test]
    fn test_prior_initialization() {
        let now = Utc::now();
        let record = module_record(now);
        assert_eq!(record.alpha, 1.0);
        assert_eq!(record.beta, 1.0);
        assert_eq!(record.sample_count, 0);
        assert!((record.mean_ability - 0.5).abs() < 1e-12);
        assert!((record.confidence - 2.0 / 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_mostly_correct_module_scenario() {
        let now = Utc::now();
        let mut record = module_record(now);
        for i in 0..24 {
            record.apply_evidence(i != 7, &norms(), now);
        }
        assert_eq!(record.alpha, 24.0);
        assert_eq!(record.beta, 2.0);
        assert_eq!(record.sample_count, 24);
        assert!((record.mean_ability - 24.0 / 26.0).abs() < 1e-12);
        assert!((record.confidence - 0.52).abs() < 1e-12);
    }

    #[test]
    fn test_item_confidence_uses_item_norm() {
        let now = Utc::now();
        let mut record = ProficiencyRecord::with_prior(
            ProficiencyKey::item("student-1", Some("reading"), "r003.1", "cat"),
            &PriorConfig::default(),
            &norms(),
            now,
        );
        record.apply_counts(EvidenceCounts { correct: 4, incorrect: 6 }, &norms(), now);
        assert_eq!(record.alpha, 5.0);
        assert_eq!(record.beta, 7.0);
        assert!((record.mean_ability - 5.0 / 12.0).abs() < 1e-12);
        assert!((record.confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let created = Utc::now() - Duration::days(3);
        let mut record = module_record(created);
        record.apply_counts(EvidenceCounts::default(), &norms(), Utc::now());
        assert_eq!(record.sample_count, 0);
        assert_eq!(record.last_updated, created);
    }

    #[test]
    fn test_effective_ability_at_zero_elapsed_is_mean() {
        let now = Utc::now();
        let mut record = module_record(now);
        record.apply_counts(EvidenceCounts { correct: 9, incorrect: 1 }, &norms(), now);
        assert_eq!(record.effective_ability(now), record.mean_ability);
    }

    #[test]
    fn test_forgetting_scenario() {
        let effective = decayed_ability(0.9, 0.05, 100);
        let decay = (-5.0f64).exp();
        assert!((effective - (0.9 * decay + 0.5 * (1.0 - decay))).abs() < 1e-12);
        assert!((effective - 0.503).abs() < 0.001);
    }

    #[test]
    fn test_decay_is_symmetric_and_non_destructive() {
        let updated = Utc::now() - Duration::days(30);
        let mut strong = module_record(updated);
        strong.apply_counts(EvidenceCounts { correct: 20, incorrect: 0 }, &norms(), updated);
        let mut weak = module_record(updated);
        weak.apply_counts(EvidenceCounts { correct: 0, incorrect: 20 }, &norms(), updated);

        let now = Utc::now();
        let strong_before = strong.clone();
        let high = strong.effective_ability(now);
        let low = weak.effective_ability(now);

        assert!(high < strong.mean_ability && high > 0.5);
        assert!(low > weak.mean_ability && low < 0.5);
        assert_eq!(strong, strong_before);
        assert_eq!(strong.effective_ability(now), high);
    }

    #[test]
    fn test_negative_elapsed_time_counts_as_zero() {
        let now = Utc::now();
        assert_eq!(elapsed_days(now, now - Duration::days(2)), 0);
        assert_eq!(decayed_ability(0.8, 0.05, 0), 0.8);
    }
}
