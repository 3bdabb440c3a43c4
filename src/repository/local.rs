//! In-memory repository.
//!
//! All data lives behind one lock. `replace_schedule` checks every row before
//! touching the stored schedule and swaps the period's entries in a single
//! step, so readers see either the old schedule or the new one.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::TimetableRepository;
use crate::data::{
    ClassGroupId, ObligationId, Period, PeriodId, ScheduleEntry, TeachingObligation, TimeSlot,
    TimeSlotId,
};
use crate::error::{RepositoryError, RepositoryResult};

/// Initial contents for a [`LocalRepository`], usually read from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub periods: Vec<Period>,
    #[serde(default, alias = "obligations")]
    pub teaching_assignments: Vec<TeachingObligation>,
    #[serde(default)]
    pub time_slots: Vec<TimeSlot>,
}

#[derive(Clone)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
}

struct LocalData {
    periods: BTreeMap<PeriodId, Period>,
    obligations: BTreeMap<ObligationId, TeachingObligation>,
    time_slots: BTreeMap<TimeSlotId, TimeSlot>,
    schedules: HashMap<PeriodId, Vec<ScheduleEntry>>,
    is_healthy: bool,
}

impl Default for LocalData {
    fn default() -> Self {
        Self {
            periods: BTreeMap::new(),
            obligations: BTreeMap::new(),
            time_slots: BTreeMap::new(),
            schedules: HashMap::new(),
            is_healthy: true,
        }
    }
}

impl Default for LocalRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRepository {
    /// Create a new empty local repository.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(LocalData::default())),
        }
    }

    pub fn from_seed(seed: Seed) -> Self {
        let repo = Self::new();
        for period in seed.periods {
            repo.insert_period(period);
        }
        for obligation in seed.teaching_assignments {
            repo.insert_obligation(obligation);
        }
        for slot in seed.time_slots {
            repo.insert_time_slot(slot);
        }
        repo
    }

    pub fn insert_period(&self, period: Period) {
        self.data.write().periods.insert(period.id, period);
    }

    pub fn insert_obligation(&self, obligation: TeachingObligation) {
        self.data
            .write()
            .obligations
            .insert(obligation.id, obligation);
    }

    pub fn insert_time_slot(&self, slot: TimeSlot) {
        self.data.write().time_slots.insert(slot.id, slot);
    }

    /// Set the health status for testing connection failures.
    pub fn set_healthy(&self, healthy: bool) {
        self.data.write().is_healthy = healthy;
    }

    fn ensure_healthy(data: &LocalData) -> RepositoryResult<()> {
        if data.is_healthy {
            Ok(())
        } else {
            Err(RepositoryError::Connection(
                "local repository marked unhealthy".to_string(),
            ))
        }
    }

    /// Row-level checks a relational store would enforce with foreign keys
    /// and a unique (class group, slot) index.
    fn check_rows(
        data: &LocalData,
        period_id: PeriodId,
        entries: &[ScheduleEntry],
    ) -> RepositoryResult<()> {
        let mut seen: HashSet<(ClassGroupId, TimeSlotId)> = HashSet::new();
        for entry in entries {
            if entry.period_id != period_id {
                return Err(RepositoryError::Integrity(format!(
                    "entry for period {} cannot be stored under period {}",
                    entry.period_id, period_id
                )));
            }
            if !data.obligations.contains_key(&entry.obligation_id) {
                return Err(RepositoryError::Integrity(format!(
                    "unknown teaching obligation {}",
                    entry.obligation_id
                )));
            }
            match data.time_slots.get(&entry.time_slot_id) {
                Some(slot) if slot.period_id == period_id => {}
                _ => {
                    return Err(RepositoryError::Integrity(format!(
                        "unknown time slot {} in period {}",
                        entry.time_slot_id, period_id
                    )));
                }
            }
            if !seen.insert((entry.class_group_id, entry.time_slot_id)) {
                return Err(RepositoryError::Integrity(format!(
                    "duplicate entry for class group {} in slot {}",
                    entry.class_group_id, entry.time_slot_id
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TimetableRepository for LocalRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(self.data.read().is_healthy)
    }

    async fn get_period(&self, period_id: PeriodId) -> RepositoryResult<Period> {
        let data = self.data.read();
        Self::ensure_healthy(&data)?;
        data.periods
            .get(&period_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("period {period_id}")))
    }

    async fn obligations_for_period(
        &self,
        period_id: PeriodId,
    ) -> RepositoryResult<Vec<TeachingObligation>> {
        let data = self.data.read();
        Self::ensure_healthy(&data)?;
        Ok(data
            .obligations
            .values()
            .filter(|o| o.period_id == period_id)
            .cloned()
            .collect())
    }

    async fn time_slots_for_period(&self, period_id: PeriodId) -> RepositoryResult<Vec<TimeSlot>> {
        let data = self.data.read();
        Self::ensure_healthy(&data)?;
        Ok(data
            .time_slots
            .values()
            .filter(|s| s.period_id == period_id)
            .cloned()
            .collect())
    }

    async fn replace_schedule(
        &self,
        period_id: PeriodId,
        entries: &[ScheduleEntry],
    ) -> RepositoryResult<usize> {
        let mut data = self.data.write();
        Self::ensure_healthy(&data)?;
        if !data.periods.contains_key(&period_id) {
            return Err(RepositoryError::NotFound(format!("period {period_id}")));
        }
        Self::check_rows(&data, period_id, entries)?;

        data.schedules.insert(period_id, entries.to_vec());
        Ok(entries.len())
    }

    async fn list_schedule(
        &self,
        period_id: PeriodId,
        class_group_id: Option<ClassGroupId>,
    ) -> RepositoryResult<Vec<ScheduleEntry>> {
        let data = self.data.read();
        Self::ensure_healthy(&data)?;

        let mut entries: Vec<ScheduleEntry> = data
            .schedules
            .get(&period_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| class_group_id.is_none_or(|cg| e.class_group_id == cg))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        entries.sort_by_key(|e| {
            let slot = data.time_slots.get(&e.time_slot_id);
            (
                e.class_group_id,
                slot.map(|s| s.day_of_week),
                slot.map(|s| s.start_time),
                e.time_slot_id,
            )
        });
        Ok(entries)
    }
}
