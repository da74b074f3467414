//! Recommendation policy and mastery gate.
//!
//! Turns the module-level estimate (after forgetting) into what the next run
//! of an activity should look like. Every decision here is a pure read of the
//! store; nothing is written, not even a lazily created prior.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::adaptive::config::{AdaptiveConfig, MasteryGateConfig, PolicyThresholds, PriorConfig};
use crate::adaptive::difficulty::{tuning_for, LabelScheme};
use crate::adaptive::proficiency::ProficiencyRecord;
use crate::adaptive::types::{ActivityTuning, ActivityType, DifficultyTier, ProficiencyKey, Recommendation};
use crate::storage::{ProficiencyStore, StorageResult};

pub const SKIP_REASON: &str =
    "You've mastered this content! This is a bonus activity - skip or play for fun.";

/// Label served in place of a difficulty when the activity is skipped.
pub const SKIP_LABEL: &str = "skip";

pub struct RecommendationPolicy {
    thresholds: PolicyThresholds,
    mastery: MasteryGateConfig,
    prior: PriorConfig,
}

impl RecommendationPolicy {
    pub fn new(config: &AdaptiveConfig) -> Self {
        Self {
            thresholds: config.policy.clone(),
            mastery: config.mastery.clone(),
            prior: config.prior.clone(),
        }
    }

    pub fn thresholds(&self) -> &PolicyThresholds {
        &self.thresholds
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
        self.recommend_at(store, student_id, module_id, activity, is_optional, Utc::now())
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
        let scheme = LabelScheme::for_activity(activity);
        let key = ProficiencyKey::module(student_id, None, module_id);

        let module = match store.get_proficiency(&key)? {
            Some(record) if record.sample_count > 0 => record,
            _ => {
                tracing::debug!(student_id, module_id, activity = %activity, "no evidence, serving defaults");
                return Ok(Recommendation {
                    difficulty: scheme.default_label().to_string(),
                    num_questions: self.thresholds.full_questions,
                    focus_items: Vec::new(),
                    skip: false,
                    skip_reason: None,
                    tuning: tuning_for(activity, DifficultyTier::Easy),
                });
            }
        };

        let ability = module.effective_ability(now);

        if is_optional && ability >= self.thresholds.skip_ability {
            tracing::debug!(student_id, module_id, activity = %activity, ability, "optional activity skippable");
            return Ok(Recommendation {
                difficulty: SKIP_LABEL.to_string(),
                num_questions: 0,
                focus_items: Vec::new(),
                skip: true,
                skip_reason: Some(SKIP_REASON.to_string()),
                tuning: ActivityTuning::default(),
            });
        }

        let tier = self.tier_for(ability).min(scheme.top_tier());
        let num_questions = self.question_count(ability, module.confidence);
        let focus_items = self.focus_items(store, student_id, module_id, now)?;

        tracing::debug!(
            student_id,
            module_id,
            activity = %activity,
            ability,
            confidence = module.confidence,
            difficulty = scheme.label(tier),
            num_questions,
            focus = focus_items.len(),
            "recommendation"
        );

        Ok(Recommendation {
            difficulty: scheme.label(tier).to_string(),
            num_questions,
            focus_items,
            skip: false,
            skip_reason: None,
            tuning: tuning_for(activity, tier),
        })
    }

    /// Three-tier mapping of a decayed ability.
    pub fn tier_for(&self, ability: f64) -> DifficultyTier {
        if ability >= self.thresholds.hard_ability {
            DifficultyTier::Hard
        } else if ability >= self.thresholds.medium_ability {
            DifficultyTier::Medium
        } else {
            DifficultyTier::Easy
        }
    }

    /// Fewer questions only once the estimate is both high and well supported.
    pub fn question_count(&self, ability: f64, confidence: f64) -> u32 {
        let t = &self.thresholds;
        if ability >= t.quick_check_ability && confidence >= t.quick_check_confidence {
            t.quick_check_questions
        } else if ability >= t.moderate_ability && confidence >= t.moderate_confidence {
            t.moderate_questions
        } else {
            t.full_questions
        }
    }

    /// Weakest items of the module after decay, lowest first.
    pub fn focus_items<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<String>>
    where
        S: ProficiencyStore + ?Sized,
    {
        let mut weak: Vec<(f64, String)> = store
            .item_proficiencies(student_id, module_id)?
            .iter()
            .filter_map(|record| {
                let ability = record.effective_ability(now);
                let item = record.key.item_id.clone()?;
                (ability < self.thresholds.focus_ability).then_some((ability, item))
            })
            .collect();

        weak.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal).then_with(|| a.1.cmp(&b.1)));
        weak.truncate(self.thresholds.max_focus_items);

        Ok(weak.into_iter().map(|(_, item)| item).collect())
    }

    /// Mastery gate at the configured default threshold.
    pub fn check_mastery<S>(&self, store: &S, student_id: &str, module_id: &str) -> StorageResult<bool>
    where
        S: ProficiencyStore + ?Sized,
    {
        self.check_mastery_at(store, student_id, module_id, self.mastery.threshold, Utc::now())
    }

    /// False below the evidence floor, whatever the point estimate says.
    pub fn check_mastery_at<S>(
        &self,
        store: &S,
        student_id: &str,
        module_id: &str,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>
    where
        S: ProficiencyStore + ?Sized,
    {
        let key = ProficiencyKey::module(student_id, None, module_id);
        let Some(record) = store.get_proficiency(&key)? else {
            return Ok(false);
        };
        Ok(passes_gate(&record, &self.mastery, threshold, now))
    }

    /// Decayed domain ability, or the prior mean when nothing was recorded.
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
        let key = ProficiencyKey::domain(student_id, domain);
        Ok(match store.get_proficiency(&key)? {
            Some(record) if record.sample_count > 0 => record.effective_ability(now),
            _ => self.prior.mean(),
        })
    }
}

fn passes_gate(record: &ProficiencyRecord, gate: &MasteryGateConfig, threshold: f64, now: DateTime<Utc>) -> bool {
    record.sample_count >= gate.min_samples && record.effective_ability(now) >= threshold
}
