//! Difficulty label vocabulary per activity type.
//!
//! The policy works on [`DifficultyTier`]; this table maps tiers to the labels
//! each activity understands and ranks incoming labels back onto a comparable
//! scale.

use crate::adaptive::types::{ActivityTuning, ActivityType, DifficultyTier};

/// Reading speed targets per tier.
const READING_WPM: [u32; 3] = [100, 150, 200];
const NUMERIC_CHOICES: std::ops::RangeInclusive<u32> = 3..=5;

/// How one activity type names and orders its difficulty tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelScheme {
    /// `'3'/'4'/'5'`, compared numerically.
    Numeric,
    /// `'easy'/'moderate'`; the activity has no tier above `moderate`.
    Moderate,
    /// `'easy'/'medium'/'hard'`.
    Standard,
    /// `'easy'/'medium'/'hard'` or a literal words-per-minute target, compared by WPM.
    ReadingSpeed,
}

impl LabelScheme {
    pub fn for_activity(activity: &ActivityType) -> Self {
        match activity {
            ActivityType::MultipleChoice => Self::Numeric,
            ActivityType::FillInTheBlank => Self::Moderate,
            ActivityType::FluentReading => Self::ReadingSpeed,
            _ => Self::Standard,
        }
    }

    /// Hardest tier the activity offers.
    pub fn top_tier(&self) -> DifficultyTier {
        match self {
            Self::Moderate => DifficultyTier::Medium,
            _ => DifficultyTier::Hard,
        }
    }

    /// Label served for `tier`, clamped to the activity's hardest tier.
    pub fn label(&self, tier: DifficultyTier) -> &'static str {
        let tier = tier.min(self.top_tier());
        match (self, tier) {
            (Self::Numeric, DifficultyTier::Easy) => "3",
            (Self::Numeric, DifficultyTier::Medium) => "4",
            (Self::Numeric, DifficultyTier::Hard) => "5",
            (Self::Moderate, DifficultyTier::Easy) => "easy",
            (Self::Moderate, _) => "moderate",
            (_, DifficultyTier::Easy) => "easy",
            (_, DifficultyTier::Medium) => "medium",
            (_, DifficultyTier::Hard) => "hard",
        }
    }

    /// Comparable rank of an arbitrary label under this scheme.
    ///
    /// Numeric labels compare by value, reading labels by WPM and everything
    /// else by the ordinal `easy < medium|moderate < hard`. Unrecognised labels,
    /// including numbers outside the `3..=5` choice table, rank with the
    /// easiest tier.
    pub fn rank(&self, label: &str) -> u32 {
        let label = label.trim().to_lowercase();
        match self {
            Self::Numeric => match label.parse::<u32>() {
                Ok(choices) if NUMERIC_CHOICES.contains(&choices) => choices,
                Ok(_) => *NUMERIC_CHOICES.start(),
                Err(_) => ordinal(&label) + 2,
            },
            Self::ReadingSpeed => label
                .parse::<u32>()
                .unwrap_or_else(|_| READING_WPM[ordinal(&label) as usize - 1]),
            Self::Moderate | Self::Standard => ordinal(&label),
        }
    }

    /// True when `label` is at (or beyond) the activity's hardest tier.
    pub fn is_top_tier(&self, label: &str) -> bool {
        self.rank(label) >= self.rank(self.label(self.top_tier()))
    }

    /// Lowest label, served when there is no evidence yet.
    pub fn default_label(&self) -> &'static str {
        self.label(DifficultyTier::Easy)
    }
}

fn ordinal(label: &str) -> u32 {
    match label {
        "hard" | "5" => 3,
        "medium" | "moderate" | "4" => 2,
        _ => 1,
    }
}

/// Activity-specific knobs for a tier.
pub fn tuning_for(activity: &ActivityType, tier: DifficultyTier) -> ActivityTuning {
    match activity {
        ActivityType::MultipleChoice => ActivityTuning {
            num_choices: Some(4),
            ..Default::default()
        },
        ActivityType::BubblePop => {
            let (speed, error_rate) = match tier {
                DifficultyTier::Easy => (1.0, 0.2),
                DifficultyTier::Medium => (1.5, 0.3),
                DifficultyTier::Hard => (2.0, 0.3),
            };
            ActivityTuning {
                bubble_speed: Some(speed),
                error_rate: Some(error_rate),
                ..Default::default()
            }
        }
        ActivityType::FluentReading => ActivityTuning {
            target_wpm: Some(READING_WPM[tier.rank() as usize - 1]),
            ..Default::default()
        },
        _ => ActivityTuning::default(),
    }
}
