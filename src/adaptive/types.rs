use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Granularity of an ability estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProficiencyLevel {
    Domain,
    Module,
    Item,
}

impl ProficiencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Module => "module",
            Self::Item => "item",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "domain" => Some(Self::Domain),
            "module" => Some(Self::Module),
            "item" => Some(Self::Item),
            _ => None,
        }
    }
}

/// Identity of one proficiency record.
///
/// Domain records carry only `domain`; module records carry `module_id`
/// (and the domain they were created under); item records carry all three.
/// Lookups match on the keys that the level defines, see [`ProficiencyKey::identity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProficiencyKey {
    pub student_id: String,
    pub level: ProficiencyLevel,
    pub domain: Option<String>,
    pub module_id: Option<String>,
    pub item_id: Option<String>,
}

impl ProficiencyKey {
    pub fn domain(student_id: &str, domain: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            level: ProficiencyLevel::Domain,
            domain: Some(domain.to_string()),
            module_id: None,
            item_id: None,
        }
    }

    pub fn module(student_id: &str, domain: Option<&str>, module_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            level: ProficiencyLevel::Module,
            domain: domain.map(str::to_string),
            module_id: Some(module_id.to_string()),
            item_id: None,
        }
    }

    pub fn item(student_id: &str, domain: Option<&str>, module_id: &str, item_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            level: ProficiencyLevel::Item,
            domain: domain.map(str::to_string),
            module_id: Some(module_id.to_string()),
            item_id: Some(item_id.to_string()),
        }
    }

    /// The columns that uniquely identify a record at this level.
    ///
    /// Module and item records are found by module id regardless of the domain
    /// they were first filed under, so recommendation reads (which only know
    /// the module) see the same record that evidence writes touch.
    pub fn identity(&self) -> (String, ProficiencyLevel, String, String, String) {
        let domain = match self.level {
            ProficiencyLevel::Domain => self.domain.clone().unwrap_or_default(),
            _ => String::new(),
        };
        (
            self.student_id.clone(),
            self.level,
            domain,
            self.module_id.clone().unwrap_or_default(),
            self.item_id.clone().unwrap_or_default(),
        )
    }
}

/// Activity stages. Unknown types are kept verbatim and handled with the
/// generic three-tier rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivityType {
    MultipleChoice,
    FillInTheBlank,
    Spelling,
    BubblePop,
    FluentReading,
    Other(String),
}

impl ActivityType {
    /// Fixed pedagogical order.
    pub const SEQUENCE: [ActivityType; 5] = [
        ActivityType::MultipleChoice,
        ActivityType::FillInTheBlank,
        ActivityType::Spelling,
        ActivityType::BubblePop,
        ActivityType::FluentReading,
    ];

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "multiple_choice" => Self::MultipleChoice,
            "fill_in_the_blank" => Self::FillInTheBlank,
            "spelling" => Self::Spelling,
            "bubble_pop" => Self::BubblePop,
            "fluent_reading" => Self::FluentReading,
            _ => Self::Other(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::MultipleChoice => "multiple_choice",
            Self::FillInTheBlank => "fill_in_the_blank",
            Self::Spelling => "spelling",
            Self::BubblePop => "bubble_pop",
            Self::FluentReading => "fluent_reading",
            Self::Other(name) => name,
        }
    }

    /// Position in [`ActivityType::SEQUENCE`], `None` for unknown types.
    pub fn position(&self) -> Option<usize> {
        Self::SEQUENCE.iter().position(|a| a == self)
    }

    pub fn next_in_sequence(&self) -> Option<ActivityType> {
        self.position()
            .and_then(|i| Self::SEQUENCE.get(i + 1))
            .cloned()
    }

    pub fn display_name(&self) -> String {
        self.as_str()
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActivityType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActivityType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// The three numeric difficulty tiers the policy is written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyTier {
    Easy,
    Medium,
    Hard,
}

impl DifficultyTier {
    pub fn rank(&self) -> u32 {
        match self {
            Self::Easy => 1,
            Self::Medium => 2,
            Self::Hard => 3,
        }
    }
}

/// A curriculum item a module is built from (usually a vocabulary word).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
}

impl ItemRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// One graded answer inside an evidence batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item: String,
    pub correct: bool,
}

impl ItemResult {
    pub fn new(item: impl Into<String>, correct: bool) -> Self {
        Self {
            item: item.into(),
            correct,
        }
    }
}

/// Correct/incorrect totals folded into a record in one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceCounts {
    pub correct: u32,
    pub incorrect: u32,
}

impl EvidenceCounts {
    pub fn single(correct: bool) -> Self {
        if correct {
            Self { correct: 1, incorrect: 0 }
        } else {
            Self { correct: 0, incorrect: 1 }
        }
    }

    pub fn from_results(results: &[ItemResult]) -> Self {
        let correct = results.iter().filter(|r| r.correct).count() as u32;
        Self {
            correct,
            incorrect: results.len() as u32 - correct,
        }
    }

    pub fn total(&self) -> u32 {
        self.correct + self.incorrect
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Activity-specific knobs derived from the chosen tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityTuning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_choices: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bubble_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_wpm: Option<u32>,
}

/// What to serve for the next run of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub difficulty: String,
    pub num_questions: u32,
    pub focus_items: Vec<String>,
    pub skip: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub tuning: ActivityTuning,
}

/// Output of [`crate::adaptive::progression::ProgressionEngine::next_activity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextActivityDecision {
    pub activity_type: ActivityType,
    pub reason: String,
    pub is_new: bool,
    pub progress_percentage: f64,
    pub unlocked_new: bool,
    pub total_activities: u32,
    pub completed_activities: u32,
}

/// One finished run of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityAttempt {
    pub id: String,
    pub student_id: String,
    pub module_id: String,
    pub activity_type: ActivityType,
    pub difficulty: String,
    pub score_percent: f64,
    pub attempted_at: DateTime<Utc>,
}

impl ActivityAttempt {
    pub fn new(
        student_id: &str,
        module_id: &str,
        activity_type: ActivityType,
        difficulty: &str,
        score_percent: f64,
        attempted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            module_id: module_id.to_string(),
            activity_type,
            difficulty: difficulty.to_string(),
            score_percent,
            attempted_at,
        }
    }
}

/// Attempt count and best score for one (student, module, activity).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempts: u32,
    pub best_percentage: Option<f64>,
}

/// Converts a raw score into a percentage; an empty activity counts as 0%.
pub fn score_percentage(score: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        score as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_type_round_trip_and_fallback() {
        for activity in ActivityType::SEQUENCE.iter() {
            assert_eq!(&ActivityType::parse(activity.as_str()), activity);
        }
        let other = ActivityType::parse("word_search");
        assert_eq!(other, ActivityType::Other("word_search".to_string()));
        assert_eq!(other.position(), None);
        assert_eq!(other.next_in_sequence(), None);
    }

    #[test]
    fn test_sequence_navigation() {
        assert_eq!(
            ActivityType::MultipleChoice.next_in_sequence(),
            Some(ActivityType::FillInTheBlank)
        );
        assert_eq!(ActivityType::FluentReading.next_in_sequence(), None);
        assert_eq!(ActivityType::FillInTheBlank.display_name(), "Fill In The Blank");
    }

    #[test]
    fn test_score_percentage_guards_zero_total() {
        assert_eq!(score_percentage(3, 0), 0.0);
        assert!((score_percentage(17, 20) - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_evidence_counts_from_results() {
        let results = vec![
            ItemResult::new("cat", true),
            ItemResult::new("dog", false),
            ItemResult::new("sun", true),
        ];
        let counts = EvidenceCounts::from_results(&results);
        assert_eq!(counts.correct, 2);
        assert_eq!(counts.incorrect, 1);
        assert!(EvidenceCounts::from_results(&[]).is_empty());
    }

    #[test]
    fn test_module_identity_ignores_domain() {
        let with_domain = ProficiencyKey::module("s1", Some("reading"), "r003.1");
        let without = ProficiencyKey::module("s1", None, "r003.1");
        assert_eq!(with_domain.identity(), without.identity());
    }
}
