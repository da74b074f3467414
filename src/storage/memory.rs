use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::adaptive::mastery::{ActivityKey, ActivityMasteryRecord};
use crate::adaptive::proficiency::ProficiencyRecord;
use crate::adaptive::types::{
    ActivityAttempt, ActivityType, AttemptSummary, ProficiencyKey, ProficiencyLevel,
};
use crate::storage::{ActivityStore, ProficiencyStore, StorageResult};

type Identity = (String, ProficiencyLevel, String, String, String);

/// Process-local store.
///
/// Every record lives in its own mutex cell; the outer map lock is held only
/// to find or insert a cell, so updates to different keys run in parallel and
/// updates to the same key serialize.
#[derive(Default)]
pub struct MemoryStore {
    proficiencies: RwLock<HashMap<Identity, Arc<Mutex<Option<ProficiencyRecord>>>>>,
    mastery: RwLock<HashMap<ActivityKey, Arc<Mutex<Option<ActivityMasteryRecord>>>>>,
    attempts: RwLock<HashMap<ActivityKey, Vec<ActivityAttempt>>>,
    unlocks: RwLock<HashMap<(String, String), BTreeMap<(usize, String), (ActivityType, DateTime<Utc>)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn proficiency_cell(&self, key: &ProficiencyKey) -> Arc<Mutex<Option<ProficiencyRecord>>> {
        let identity = key.identity();
        if let Some(cell) = self.proficiencies.read().get(&identity) {
            return Arc::clone(cell);
        }
        let mut map = self.proficiencies.write();
        Arc::clone(map.entry(identity).or_default())
    }

    fn mastery_cell(&self, key: &ActivityKey) -> Arc<Mutex<Option<ActivityMasteryRecord>>> {
        if let Some(cell) = self.mastery.read().get(key) {
            return Arc::clone(cell);
        }
        let mut map = self.mastery.write();
        Arc::clone(map.entry(key.clone()).or_default())
    }
}

impl ProficiencyStore for MemoryStore {
    fn get_proficiency(&self, key: &ProficiencyKey) -> StorageResult<Option<ProficiencyRecord>> {
        let cell = self.proficiencies.read().get(&key.identity()).cloned();
        Ok(cell.and_then(|cell| cell.lock().clone()))
    }

    fn update_proficiency(
        &self,
        key: &ProficiencyKey,
        update: &mut dyn FnMut(Option<ProficiencyRecord>) -> ProficiencyRecord,
    ) -> StorageResult<ProficiencyRecord> {
        let cell = self.proficiency_cell(key);
        let mut slot = cell.lock();
        let record = update(slot.take());
        *slot = Some(record.clone());
        Ok(record)
    }

    fn item_proficiencies(
        &self,
        student_id: &str,
        module_id: &str,
    ) -> StorageResult<Vec<ProficiencyRecord>> {
        let cells: Vec<_> = self
            .proficiencies
            .read()
            .iter()
            .filter(|((student, level, _, module, _), _)| {
                student == student_id && *level == ProficiencyLevel::Item && module == module_id
            })
            .map(|(_, cell)| Arc::clone(cell))
            .collect();

        let mut records: Vec<ProficiencyRecord> =
            cells.iter().filter_map(|cell| cell.lock().clone()).collect();
        records.sort_by(|a, b| a.key.item_id.cmp(&b.key.item_id));
        Ok(records)
    }
}

impl ActivityStore for MemoryStore {
    fn get_mastery(&self, key: &ActivityKey) -> StorageResult<Option<ActivityMasteryRecord>> {
        let cell = self.mastery.read().get(key).cloned();
        Ok(cell.and_then(|cell| cell.lock().clone()))
    }

    fn update_mastery(
        &self,
        key: &ActivityKey,
        update: &mut dyn FnMut(Option<ActivityMasteryRecord>) -> ActivityMasteryRecord,
    ) -> StorageResult<ActivityMasteryRecord> {
        let cell = self.mastery_cell(key);
        let mut slot = cell.lock();
        let record = update(slot.take());
        *slot = Some(record.clone());
        Ok(record)
    }

    fn append_attempt(&self, attempt: &ActivityAttempt) -> StorageResult<()> {
        let key = ActivityKey::new(
            &attempt.student_id,
            &attempt.module_id,
            attempt.activity_type.clone(),
        );
        self.attempts
            .write()
            .entry(key)
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    fn recent_attempts(&self, key: &ActivityKey, limit: usize) -> StorageResult<Vec<ActivityAttempt>> {
        let mut attempts = self.attempts.read().get(key).cloned().unwrap_or_default();
        // equal timestamps: later insert wins
        attempts.reverse();
        attempts.sort_by(|a, b| b.attempted_at.cmp(&a.attempted_at));
        attempts.truncate(limit);
        Ok(attempts)
    }

    fn attempt_summary(&self, key: &ActivityKey) -> StorageResult<AttemptSummary> {
        let map = self.attempts.read();
        let Some(attempts) = map.get(key) else {
            return Ok(AttemptSummary::default());
        };
        let best = attempts
            .iter()
            .map(|a| a.score_percent)
            .fold(None, |best: Option<f64>, score| {
                Some(best.map_or(score, |b| b.max(score)))
            });
        Ok(AttemptSummary {
            attempts: attempts.len() as u32,
            best_percentage: best,
        })
    }

    fn record_unlock(&self, key: &ActivityKey, at: DateTime<Utc>) -> StorageResult<bool> {
        let order = key.activity_type.position().unwrap_or(usize::MAX);
        let mut map = self.unlocks.write();
        let unlocked = map
            .entry((key.student_id.clone(), key.module_id.clone()))
            .or_default();
        let slot = (order, key.activity_type.as_str().to_string());
        if unlocked.contains_key(&slot) {
            return Ok(false);
        }
        unlocked.insert(slot, (key.activity_type.clone(), at));
        Ok(true)
    }

    fn unlocked_activities(&self, student_id: &str, module_id: &str) -> StorageResult<Vec<ActivityType>> {
        let map = self.unlocks.read();
        Ok(map
            .get(&(student_id.to_string(), module_id.to_string()))
            .map(|unlocked| unlocked.values().map(|(activity, _)| activity.clone()).collect())
            .unwrap_or_default())
    }
}
