use serde::{Deserialize, Serialize};

use crate::adaptive::types::{ActivityType, ProficiencyLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorConfig {
    pub alpha: f64,
    pub beta: f64,
    pub learning_rate: f64,
    /// Per day.
    pub forgetting_rate: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            learning_rate: 0.1,
            forgetting_rate: 0.05,
        }
    }
}

impl PriorConfig {
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

/// Evidence mass (alpha + beta) needed for full confidence at each level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceNorms {
    pub item: f64,
    pub module: f64,
    pub domain: f64,
}

impl Default for ConfidenceNorms {
    fn default() -> Self {
        Self {
            item: 20.0,
            module: 50.0,
            domain: 100.0,
        }
    }
}

impl ConfidenceNorms {
    pub fn for_level(&self, level: ProficiencyLevel) -> f64 {
        match level {
            ProficiencyLevel::Item => self.item,
            ProficiencyLevel::Module => self.module,
            ProficiencyLevel::Domain => self.domain,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyThresholds {
    pub hard_ability: f64,
    pub medium_ability: f64,
    pub skip_ability: f64,
    pub quick_check_ability: f64,
    pub quick_check_confidence: f64,
    pub quick_check_questions: u32,
    pub moderate_ability: f64,
    pub moderate_confidence: f64,
    pub moderate_questions: u32,
    pub full_questions: u32,
    pub focus_ability: f64,
    pub max_focus_items: usize,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            hard_ability: 0.80,
            medium_ability: 0.65,
            skip_ability: 0.90,
            quick_check_ability: 0.85,
            quick_check_confidence: 0.8,
            quick_check_questions: 5,
            moderate_ability: 0.70,
            moderate_confidence: 0.6,
            moderate_questions: 7,
            full_questions: 10,
            focus_ability: 0.70,
            max_focus_items: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryGateConfig {
    pub threshold: f64,
    pub min_samples: u32,
}

impl Default for MasteryGateConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            min_samples: 10,
        }
    }
}

/// Module-proficiency needed at each stage before moving past it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockThresholds {
    pub multiple_choice: f64,
    pub fill_in_the_blank: f64,
    pub spelling: f64,
    pub bubble_pop: f64,
    pub fluent_reading: f64,
    pub fallback: f64,
}

impl Default for UnlockThresholds {
    fn default() -> Self {
        Self {
            multiple_choice: 0.70,
            fill_in_the_blank: 0.75,
            spelling: 0.80,
            bubble_pop: 0.85,
            fluent_reading: 0.90,
            fallback: 0.75,
        }
    }
}

impl UnlockThresholds {
    pub fn for_activity(&self, activity: &ActivityType) -> f64 {
        match activity {
            ActivityType::MultipleChoice => self.multiple_choice,
            ActivityType::FillInTheBlank => self.fill_in_the_blank,
            ActivityType::Spelling => self.spelling,
            ActivityType::BubblePop => self.bubble_pop,
            ActivityType::FluentReading => self.fluent_reading,
            ActivityType::Other(_) => self.fallback,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionConfig {
    pub hard_mode_score: f64,
    pub recent_window: usize,
    pub struggling_average: f64,
    pub practice_best_score: f64,
    pub progress_best_score: f64,
    pub unlock: UnlockThresholds,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            hard_mode_score: 80.0,
            recent_window: 3,
            struggling_average: 60.0,
            practice_best_score: 85.0,
            progress_best_score: 70.0,
            unlock: UnlockThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    pub prior: PriorConfig,
    pub confidence: ConfidenceNorms,
    pub policy: PolicyThresholds,
    pub mastery: MasteryGateConfig,
    pub progression: ProgressionConfig,
}
