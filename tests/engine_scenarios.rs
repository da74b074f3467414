//! End-to-end scenarios through the public engine API.

use chrono::{DateTime, Duration, Utc};

use adaptive_tutor::adaptive::{
    ActivityType, AdaptiveEngine, ItemRef, ItemResult, ProficiencyKey,
};
use adaptive_tutor::storage::{MemoryStore, ProficiencyStore};

const STUDENT: &str = "student-1";
const MODULE: &str = "r003.1";
const DOMAIN: &str = "reading";

fn batch(correct: usize, incorrect: usize) -> Vec<ItemResult> {
    (0..correct + incorrect)
        .map(|i| ItemResult::new(format!("word_{i}"), i < correct))
        .collect()
}

fn vocabulary(n: usize) -> Vec<ItemRef> {
    (0..n).map(|i| ItemRef::new(format!("word_{i}"))).collect()
}

fn setup() -> (MemoryStore, AdaptiveEngine, DateTime<Utc>) {
    let store = MemoryStore::new();
    let engine = AdaptiveEngine::default();
    let now = Utc::now();
    engine
        .initialize_proficiencies_at(&store, STUDENT, MODULE, DOMAIN, &vocabulary(24), now)
        .unwrap();
    (store, engine, now)
}

#[test]
fn strong_first_session_hits_top_tier_with_full_question_count() {
    let (store, engine, now) = setup();
    engine
        .record_evidence_at(&store, STUDENT, MODULE, DOMAIN, &batch(23, 1), now)
        .unwrap();

    let module = store
        .get_proficiency(&ProficiencyKey::module(STUDENT, None, MODULE))
        .unwrap()
        .unwrap();
    assert_eq!(module.alpha, 24.0);
    assert_eq!(module.beta, 2.0);
    assert!((module.mean_ability - 24.0 / 26.0).abs() < 1e-9);
    assert!((module.confidence - 0.52).abs() < 1e-9);

    let rec = engine
        .recommend_at(&store, STUDENT, MODULE, &ActivityType::MultipleChoice, false, now)
        .unwrap();
    assert_eq!(rec.difficulty, "5");
    // 0.52 confidence is below both shortening gates
    assert_eq!(rec.num_questions, 10);
}

#[test]
fn second_strong_session_shortens_activity() {
    let (store, engine, now) = setup();
    engine
        .record_evidence_at(&store, STUDENT, MODULE, DOMAIN, &batch(23, 1), now)
        .unwrap();
    engine
        .record_evidence_at(&store, STUDENT, MODULE, DOMAIN, &batch(22, 2), now)
        .unwrap();

    // alpha 46, beta 4: mean 0.92, confidence 1.0
    let rec = engine
        .recommend_at(&store, STUDENT, MODULE, &ActivityType::Spelling, false, now)
        .unwrap();
    assert_eq!(rec.difficulty, "hard");
    assert_eq!(rec.num_questions, 5);
}

#[test]
fn weak_item_batch_serves_lowest_tier() {
    let (store, engine, now) = setup();
    let results = vec![
        ItemResult::new("cat", true),
        ItemResult::new("cat", true),
        ItemResult::new("cat", true),
        ItemResult::new("cat", true),
        ItemResult::new("cat", false),
        ItemResult::new("cat", false),
        ItemResult::new("cat", false),
        ItemResult::new("cat", false),
        ItemResult::new("cat", false),
        ItemResult::new("cat", false),
    ];
    engine
        .record_evidence_at(&store, STUDENT, MODULE, DOMAIN, &results, now)
        .unwrap();

    let cat = store
        .get_proficiency(&ProficiencyKey::item(STUDENT, None, MODULE, "cat"))
        .unwrap()
        .unwrap();
    assert_eq!(cat.alpha, 5.0);
    assert_eq!(cat.beta, 7.0);
    assert!((cat.confidence - 0.6).abs() < 1e-9);

    let rec = engine
        .recommend_at(&store, STUDENT, MODULE, &ActivityType::MultipleChoice, false, now)
        .unwrap();
    assert_eq!(rec.difficulty, "3");
    assert_eq!(rec.focus_items.first().map(String::as_str), Some("cat"));
}

#[test]
fn long_absence_decays_toward_neutral() {
    let (store, engine, start) = setup();
    // alpha 37, beta 5: mean 37/42, well above the hard threshold
    engine
        .record_evidence_at(&store, STUDENT, MODULE, DOMAIN, &batch(36, 4), start)
        .unwrap();

    let fresh = engine
        .recommend_at(&store, STUDENT, MODULE, &ActivityType::Spelling, false, start)
        .unwrap();
    assert_eq!(fresh.difficulty, "hard");

    let much_later = start + Duration::days(100);
    let stale = engine
        .recommend_at(&store, STUDENT, MODULE, &ActivityType::Spelling, false, much_later)
        .unwrap();
    assert_eq!(stale.difficulty, "easy");

    let ability = engine
        .domain_ability_at(&store, STUDENT, DOMAIN, much_later)
        .unwrap();
    assert!((ability - 0.5).abs() < 0.01);
}

#[test]
fn mastery_needs_ten_samples() {
    let (store, engine, now) = setup();
    engine
        .record_evidence_at(&store, STUDENT, MODULE, DOMAIN, &batch(5, 0), now)
        .unwrap();
    assert!(!engine
        .check_mastery_at(&store, STUDENT, MODULE, Some(0.5), now)
        .unwrap());

    engine
        .record_evidence_at(&store, STUDENT, MODULE, DOMAIN, &batch(5, 0), now)
        .unwrap();
    assert!(engine
        .check_mastery_at(&store, STUDENT, MODULE, None, now)
        .unwrap());
}

#[test]
fn hard_mode_survives_later_low_score() {
    let (store, engine, now) = setup();
    let first = engine
        .record_activity_attempt_at(&store, STUDENT, MODULE, ActivityType::MultipleChoice, "5", 85.0, now)
        .unwrap()
        .expect("attempt stored");
    assert!(first.completed_hard_mode);

    let second = engine
        .record_activity_attempt_at(
            &store,
            STUDENT,
            MODULE,
            ActivityType::MultipleChoice,
            "3",
            40.0,
            now + Duration::minutes(5),
        )
        .unwrap()
        .expect("attempt stored");
    assert_eq!(second.highest_difficulty, "5");
    assert!(second.completed_hard_mode);
}

#[test]
fn unlock_is_monotonic() {
    let (store, engine, now) = setup();
    engine
        .record_activity_attempt_at(&store, STUDENT, MODULE, ActivityType::MultipleChoice, "5", 90.0, now)
        .unwrap();
    let unlocked = engine.unlocked_activities(&store, STUDENT, MODULE).unwrap();
    assert_eq!(unlocked, vec![ActivityType::MultipleChoice, ActivityType::FillInTheBlank]);

    for i in 1..=5 {
        engine
            .record_activity_attempt_at(
                &store,
                STUDENT,
                MODULE,
                ActivityType::MultipleChoice,
                "3",
                10.0,
                now + Duration::minutes(i),
            )
            .unwrap();
    }
    let unlocked = engine.unlocked_activities(&store, STUDENT, MODULE).unwrap();
    assert!(unlocked.contains(&ActivityType::FillInTheBlank));
}

#[test]
fn optional_activity_skipped_once_mastered() {
    let (store, engine, now) = setup();
    engine
        .record_evidence_at(&store, STUDENT, MODULE, DOMAIN, &batch(24, 0), now)
        .unwrap();

    let optional = engine
        .recommend_at(&store, STUDENT, MODULE, &ActivityType::BubblePop, true, now)
        .unwrap();
    assert!(optional.skip);
    assert!(optional.skip_reason.is_some());

    let required = engine
        .recommend_at(&store, STUDENT, MODULE, &ActivityType::BubblePop, false, now)
        .unwrap();
    assert!(!required.skip);
}

#[test]
fn unknown_activity_uses_generic_labels() {
    let (store, engine, now) = setup();
    let word_search = ActivityType::parse("word_search");

    let rec = engine
        .recommend_at(&store, STUDENT, MODULE, &word_search, false, now)
        .unwrap();
    assert_eq!(rec.difficulty, "easy");

    let record = engine
        .record_activity_attempt_at(&store, STUDENT, MODULE, word_search.clone(), "hard", 90.0, now)
        .unwrap()
        .expect("attempt stored");
    assert!(record.completed_hard_mode);

    let decision = engine
        .get_next_activity_at(&store, STUDENT, MODULE, Some(&word_search), now)
        .unwrap();
    assert_eq!(decision.activity_type, ActivityType::MultipleChoice);
}

#[test]
fn full_loop_advances_through_sequence() {
    let (store, engine, start) = setup();
    let mut clock = start;
    let mut activity = ActivityType::MultipleChoice;
    let mut seen = vec![activity.clone()];

    for _ in 0..12 {
        clock += Duration::minutes(10);
        let rec = engine
            .recommend_at(&store, STUDENT, MODULE, &activity, false, clock)
            .unwrap();
        engine
            .record_evidence_at(&store, STUDENT, MODULE, DOMAIN, &batch(rec.num_questions as usize, 0), clock)
            .unwrap();
        // always answers at the top tier with a perfect score
        let scheme = adaptive_tutor::adaptive::LabelScheme::for_activity(&activity);
        let top = scheme.label(scheme.top_tier());
        engine
            .record_activity_attempt_at(&store, STUDENT, MODULE, activity.clone(), top, 100.0, clock)
            .unwrap();

        let decision = engine
            .get_next_activity_at(&store, STUDENT, MODULE, Some(&activity), clock)
            .unwrap();
        activity = decision.activity_type;
        if !seen.contains(&activity) {
            seen.push(activity.clone());
        }
    }

    assert_eq!(seen, ActivityType::SEQUENCE.to_vec());
    let decision = engine
        .get_next_activity_at(&store, STUDENT, MODULE, None, clock)
        .unwrap();
    assert_eq!(decision.progress_percentage, 100.0);
    assert_eq!(decision.completed_activities, 5);
}
