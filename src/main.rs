//! Scripted learner simulation.
//!
//! Each learner answers a fixed accuracy progression. Every round runs the
//! full loop against the configured store (recommend, record evidence, record
//! the attempt, pick the next activity) and prints the round as one JSON line.

use serde::Serialize;

use adaptive_tutor::adaptive::{
    score_percentage, ActivityType, AdaptiveEngine, ItemRef, ItemResult, NextActivityDecision,
    Recommendation,
};
use adaptive_tutor::config::Config;
use adaptive_tutor::logging::init_tracing;
use adaptive_tutor::storage::{SqliteStore, StorageError, StorageResult};

const MODULE_ID: &str = "r003.1";
const DOMAIN: &str = "reading";
const VOCABULARY_SIZE: usize = 24;
const ROUNDS: usize = 12;

struct Learner {
    name: &'static str,
    accuracy: Vec<f64>,
}

impl Learner {
    fn accuracy_at(&self, round: usize) -> f64 {
        self.accuracy
            .get(round)
            .or_else(|| self.accuracy.last())
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Serialize)]
struct RoundReport<'a> {
    learner: &'a str,
    round: usize,
    activity: &'a ActivityType,
    recommendation: &'a Recommendation,
    score: u32,
    total: u32,
    completed_hard_mode: bool,
    next: &'a NextActivityDecision,
}

fn learners() -> Vec<Learner> {
    vec![
        Learner {
            name: "high_performer",
            accuracy: vec![0.95; ROUNDS],
        },
        Learner {
            name: "steady_improver",
            accuracy: vec![0.65, 0.65, 0.85, 0.85, 0.80, 0.85, 0.90, 0.90],
        },
        Learner {
            name: "struggling",
            accuracy: vec![0.40, 0.45, 0.50, 0.50, 0.55, 0.60],
        },
    ]
}

fn run_learner(engine: &AdaptiveEngine, store: &SqliteStore, learner: &Learner) -> StorageResult<()> {
    let student_id = uuid::Uuid::new_v4().to_string();
    let vocabulary: Vec<ItemRef> = (0..VOCABULARY_SIZE)
        .map(|i| ItemRef::new(format!("word_{i}")))
        .collect();
    engine.initialize_proficiencies(store, &student_id, MODULE_ID, DOMAIN, &vocabulary)?;

    tracing::info!(learner = learner.name, %student_id, "simulation started");

    let mut activity = ActivityType::MultipleChoice;
    for round in 0..ROUNDS {
        let recommendation = engine.recommend(store, &student_id, MODULE_ID, &activity, false)?;
        let total = if recommendation.num_questions == 0 {
            VOCABULARY_SIZE as u32
        } else {
            recommendation.num_questions
        };
        let score = (total as f64 * learner.accuracy_at(round)) as u32;

        let results: Vec<ItemResult> = (0..total)
            .map(|i| ItemResult::new(format!("word_{i}"), i < score))
            .collect();
        engine.record_evidence(store, &student_id, MODULE_ID, DOMAIN, &results)?;

        let mastery = engine.record_activity_attempt(
            store,
            &student_id,
            MODULE_ID,
            activity.clone(),
            &recommendation.difficulty,
            score_percentage(score, total),
        )?;
        let next = engine.get_next_activity(store, &student_id, MODULE_ID, Some(&activity))?;

        let report = RoundReport {
            learner: learner.name,
            round: round + 1,
            activity: &activity,
            recommendation: &recommendation,
            score,
            total,
            completed_hard_mode: mastery.is_some_and(|m| m.completed_hard_mode),
            next: &next,
        };
        let line = serde_json::to_string(&report).map_err(|e| StorageError::Serialization(e.to_string()))?;
        println!("{line}");

        activity = next.activity_type;
    }

    let unlocked = engine.unlocked_activities(store, &student_id, MODULE_ID)?;
    tracing::info!(
        learner = learner.name,
        unlocked = unlocked.len(),
        mastered = engine.check_mastery(store, &student_id, MODULE_ID, None)?,
        domain_ability = engine.domain_ability(store, &student_id, DOMAIN)?,
        "simulation finished"
    );
    Ok(())
}

fn main() -> Result<(), StorageError> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.logging);

    let store = if config.is_in_memory() {
        SqliteStore::in_memory()?
    } else {
        SqliteStore::open(&config.database_path)?
    };
    tracing::info!(path = store.db_path(), "store opened");

    let engine = AdaptiveEngine::new(config.adaptive.clone());
    for learner in learners() {
        if let Err(e) = run_learner(&engine, &store, &learner) {
            tracing::error!(learner = learner.name, error = %e, "simulation failed");
            return Err(e);
        }
    }

    Ok(())
}
