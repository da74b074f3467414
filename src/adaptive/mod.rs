//! Adaptive-difficulty core.
//!
//! Proficiency is tracked per student at three granularities (item, module,
//! domain) as Beta-Binomial estimates with read-time forgetting. The policy
//! maps the decayed module estimate onto difficulty, question count and focus
//! items; the progression engine sequences activities behind hard-mode gates.

pub mod config;
pub mod difficulty;
pub mod engine;
pub mod mastery;
pub mod policy;
pub mod proficiency;
pub mod progression;
pub mod types;

pub use config::{
    AdaptiveConfig, ConfidenceNorms, MasteryGateConfig, PolicyThresholds, PriorConfig,
    ProgressionConfig, UnlockThresholds,
};
pub use difficulty::{tuning_for, LabelScheme};
pub use engine::AdaptiveEngine;
pub use mastery::{ActivityKey, ActivityMasteryRecord, ActivityMasteryTracker};
pub use policy::RecommendationPolicy;
pub use proficiency::{decayed_ability, elapsed_days, ProficiencyRecord, DECAY_TARGET};
pub use progression::{ContinueDecision, ProgressionEngine};
pub use types::{
    score_percentage, ActivityAttempt, ActivityTuning, ActivityType, AttemptSummary,
    DifficultyTier, EvidenceCounts, ItemRef, ItemResult, NextActivityDecision, ProficiencyKey,
    ProficiencyLevel, Recommendation,
};
