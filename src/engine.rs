//! Generation orchestrator.
//!
//! One run walks `ReadingInputs -> Solving -> Validating -> Persisting` and
//! ends in `Succeeded` or `Failed`. Runs for the same period are serialized;
//! runs for different periods proceed independently. Nothing is written before
//! `Persisting`, so a run may be dropped at any earlier point. The persisting
//! step itself runs on its own task and finishes even if the caller goes away.

use itertools::Itertools;
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::client::{ScheduleSolver, SolveOutcome};
use crate::data::{Engine, ObligationFulfillment, PeriodId, ScheduleEntry, TeachingObligation};
use crate::error::{GenerationError, RepositoryError};
use crate::packer;
use crate::repository::{TimetableRepository, load_inputs};
use crate::validator::validate_schedule;

/// States of a generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    ReadingInputs,
    Solving,
    Validating,
    Persisting,
    Succeeded,
    Failed,
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GenerationState::ReadingInputs => "reading-inputs",
            GenerationState::Solving => "solving",
            GenerationState::Validating => "validating",
            GenerationState::Persisting => "persisting",
            GenerationState::Succeeded => "succeeded",
            GenerationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub period_id: PeriodId,
    /// Entries written.
    pub total: usize,
    pub engine: Engine,
    /// Delivered versus target hours for every obligation of the period.
    pub fulfillment: Vec<ObligationFulfillment>,
}

impl GenerationOutcome {
    pub fn under_provisioned(&self) -> impl Iterator<Item = &ObligationFulfillment> {
        self.fulfillment.iter().filter(|f| !f.is_fully_scheduled())
    }

    pub fn is_fully_scheduled(&self) -> bool {
        self.under_provisioned().next().is_none()
    }
}

/// Counts delivered hours per obligation, in obligation order.
pub fn fulfillment_report(
    obligations: &[TeachingObligation],
    entries: &[ScheduleEntry],
) -> Vec<ObligationFulfillment> {
    let delivered = entries.iter().map(|e| e.obligation_id).counts();
    obligations
        .iter()
        .map(|o| ObligationFulfillment {
            obligation_id: o.id,
            class_group_id: o.class_group_id,
            teacher_id: o.teacher_id,
            target: o.weekly_hours,
            delivered: delivered.get(&o.id).copied().unwrap_or(0) as u32,
        })
        .collect()
}

/// One async lock per period, created on first use and dropped again once no
/// run holds or waits for it.
#[derive(Default)]
struct PeriodLocks {
    locks: Mutex<HashMap<PeriodId, Arc<AsyncMutex<()>>>>,
}

impl PeriodLocks {
    async fn acquire(self: &Arc<Self>, period_id: PeriodId) -> PeriodGuard {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(period_id).or_default())
        };
        PeriodGuard {
            period_id,
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(self),
        }
    }

    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Holds a period's lock; releasing it forgets the lock when nobody else
/// is waiting for the same period.
struct PeriodGuard {
    period_id: PeriodId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<PeriodLocks>,
}

impl Drop for PeriodGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.locks.lock();
        // Waiters clone the Arc under this map lock, so a count of one means
        // only the map still refers to it.
        if locks
            .get(&self.period_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.period_id);
        }
    }
}

/// Entry point for timetable generation.
#[derive(Clone)]
pub struct TimetableGenerator {
    repository: Arc<dyn TimetableRepository>,
    solver: Arc<dyn ScheduleSolver>,
    locks: Arc<PeriodLocks>,
}

impl TimetableGenerator {
    pub fn new(repository: Arc<dyn TimetableRepository>, solver: Arc<dyn ScheduleSolver>) -> Self {
        Self {
            repository,
            solver,
            locks: Arc::new(PeriodLocks::default()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn TimetableRepository> {
        &self.repository
    }

    /// Generates and stores the schedule of one period.
    ///
    /// `constraints` is forwarded to the external solver untouched.
    pub async fn generate(
        &self,
        period_id: PeriodId,
        constraints: &serde_json::Value,
    ) -> Result<GenerationOutcome, GenerationError> {
        let guard = self.locks.acquire(period_id).await;
        let result = self.run(period_id, constraints, guard).await;

        match &result {
            Ok(outcome) => info!(
                "Period {} -> {}: {} entries from {} engine",
                period_id,
                GenerationState::Succeeded,
                outcome.total,
                outcome.engine
            ),
            Err(err) => warn!("Period {} -> {}: {}", period_id, GenerationState::Failed, err),
        }
        result
    }

    async fn run(
        &self,
        period_id: PeriodId,
        constraints: &serde_json::Value,
        guard: PeriodGuard,
    ) -> Result<GenerationOutcome, GenerationError> {
        enter(period_id, GenerationState::ReadingInputs);
        let inputs = load_inputs(self.repository.as_ref(), period_id)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound(_) => GenerationError::PeriodNotFound(period_id),
                other => GenerationError::Read(other),
            })?;
        if inputs.obligations.is_empty() || inputs.time_slots.is_empty() {
            return Err(GenerationError::IncompleteInput {
                period_id,
                obligations: inputs.obligations.len(),
                slots: inputs.time_slots.len(),
            });
        }

        enter(period_id, GenerationState::Solving);
        let (engine, entries) = match self
            .solver
            .solve(period_id, &inputs.obligations, &inputs.time_slots, constraints)
            .await
        {
            SolveOutcome::Solved(entries) => (Engine::External, entries),
            SolveOutcome::Unavailable(reason) => {
                info!("Period {}: falling back to heuristic packer ({})", period_id, reason);
                (
                    Engine::Fallback,
                    packer::pack(period_id, &inputs.obligations, &inputs.time_slots),
                )
            }
        };
        if entries.is_empty() {
            return Err(GenerationError::NoFeasibleSchedule(period_id));
        }

        enter(period_id, GenerationState::Validating);
        validate_schedule(&entries, &inputs.obligations, &inputs.time_slots).map_err(
            |violations| GenerationError::InvalidSchedule {
                period_id,
                violations,
            },
        )?;

        let fulfillment = fulfillment_report(&inputs.obligations, &entries);
        for f in fulfillment.iter().filter(|f| !f.is_fully_scheduled()) {
            warn!(
                "Period {}: obligation {} (class group {}, teacher {}) scheduled {}/{} hours",
                period_id, f.obligation_id, f.class_group_id, f.teacher_id, f.delivered, f.target
            );
        }

        enter(period_id, GenerationState::Persisting);
        let repository = Arc::clone(&self.repository);
        let total = tokio::spawn(async move {
            let written = repository.replace_schedule(period_id, &entries).await;
            drop(guard);
            written
        })
        .await
        .map_err(|err| GenerationError::Persistence(RepositoryError::Internal(err.to_string())))?
        .map_err(GenerationError::Persistence)?;

        Ok(GenerationOutcome {
            period_id,
            total,
            engine,
            fulfillment,
        })
    }
}

fn enter(period_id: PeriodId, state: GenerationState) {
    info!("Period {} -> {}", period_id, state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DisabledSolver, UnavailableReason};
    use crate::data::{Period, TimeSlot, Weekday};
    use crate::repository::LocalRepository;
    use async_trait::async_trait;
    use chrono::NaiveTime;

    /// Returns a fixed outcome without looking at its inputs.
    struct FixedSolver(SolveOutcome);

    #[async_trait]
    impl ScheduleSolver for FixedSolver {
        async fn solve(
            &self,
            _period_id: PeriodId,
            _obligations: &[TeachingObligation],
            _slots: &[TimeSlot],
            _constraints: &serde_json::Value,
        ) -> SolveOutcome {
            self.0.clone()
        }
    }

    fn repo_with(hours: &[(i64, i64, i64, u32)], slot_count: i64) -> LocalRepository {
        let repo = LocalRepository::new();
        repo.insert_period(Period {
            id: 1,
            name: "Genap".into(),
        });
        for &(id, teacher, class_group, weekly_hours) in hours {
            repo.insert_obligation(TeachingObligation {
                id,
                teacher_id: teacher,
                subject_id: id,
                class_group_id: class_group,
                period_id: 1,
                weekly_hours,
            });
        }
        for id in 1..=slot_count {
            repo.insert_time_slot(TimeSlot {
                id,
                period_id: 1,
                day_of_week: Weekday::Monday,
                start_time: NaiveTime::from_hms_opt(6 + id as u32, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(6 + id as u32, 45, 0).unwrap(),
                label: None,
            });
        }
        repo
    }

    fn generator(repo: &LocalRepository, solver: impl ScheduleSolver + 'static) -> TimetableGenerator {
        TimetableGenerator::new(Arc::new(repo.clone()), Arc::new(solver))
    }

    #[test]
    fn test_fulfillment_report_counts_per_obligation() {
        let obligations = vec![
            TeachingObligation {
                id: 1,
                teacher_id: 1,
                subject_id: 1,
                class_group_id: 1,
                period_id: 1,
                weekly_hours: 2,
            },
            TeachingObligation {
                id: 2,
                teacher_id: 2,
                subject_id: 2,
                class_group_id: 1,
                period_id: 1,
                weekly_hours: 1,
            },
        ];
        let entries = vec![ScheduleEntry {
            period_id: 1,
            class_group_id: 1,
            time_slot_id: 1,
            obligation_id: 2,
            room: None,
        }];
        let report = fulfillment_report(&obligations, &entries);
        assert_eq!(report[0].delivered, 0);
        assert!(!report[0].is_fully_scheduled());
        assert_eq!(report[1].delivered, 1);
        assert!(report[1].is_fully_scheduled());
    }

    #[tokio::test]
    async fn test_unknown_period_fails() {
        let repo = repo_with(&[], 0);
        let err = generator(&repo, DisabledSolver)
            .generate(99, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::PeriodNotFound(99)));
    }

    #[tokio::test]
    async fn test_period_locks_are_released_after_runs() {
        let repo = repo_with(&[(1, 1, 1, 1)], 2);
        let generator = generator(&repo, DisabledSolver);
        for period_id in [1, 7, 8, 9] {
            let _ = generator.generate(period_id, &serde_json::Value::Null).await;
        }
        assert_eq!(generator.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_waiting_run_keeps_period_lock() {
        let locks = Arc::new(PeriodLocks::default());
        let first = locks.acquire(1).await;
        let waiting = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _second = locks.acquire(1).await;
            })
        };
        // Map, held guard and the queued waiter.
        while locks.locks.lock().get(&1).map(Arc::strong_count) != Some(3) {
            tokio::task::yield_now().await;
        }
        drop(first);
        assert_eq!(locks.len(), 1);

        waiting.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_no_obligations_is_incomplete_input() {
        let repo = repo_with(&[], 3);
        let err = generator(&repo, DisabledSolver)
            .generate(1, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "incomplete input data");
    }

    #[tokio::test]
    async fn test_zero_hour_obligations_produce_no_schedule() {
        let repo = repo_with(&[(1, 1, 1, 0)], 3);
        let err = generator(&repo, DisabledSolver)
            .generate(1, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::NoFeasibleSchedule(1)));
    }

    #[tokio::test]
    async fn test_external_schedule_is_persisted() {
        let repo = repo_with(&[(1, 1, 1, 1)], 2);
        let proposed = vec![ScheduleEntry {
            period_id: 1,
            class_group_id: 1,
            time_slot_id: 2,
            obligation_id: 1,
            room: Some("R1".into()),
        }];
        let outcome = generator(&repo, FixedSolver(SolveOutcome::Solved(proposed.clone())))
            .generate(1, &serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(outcome.engine, Engine::External);
        assert_eq!(outcome.total, 1);
        assert!(outcome.is_fully_scheduled());
        assert_eq!(repo.list_schedule(1, None).await.unwrap(), proposed);
    }

    #[tokio::test]
    async fn test_invalid_external_schedule_fails_validation() {
        // A solver that skips its own checks and hands over a double booking.
        let repo = repo_with(&[(1, 1, 1, 1), (2, 2, 1, 1)], 2);
        let clash = [1, 2]
            .map(|obligation_id| ScheduleEntry {
                period_id: 1,
                class_group_id: 1,
                time_slot_id: 1,
                obligation_id,
                room: None,
            })
            .to_vec();
        let err = generator(&repo, FixedSolver(SolveOutcome::Solved(clash)))
            .generate(1, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidSchedule { .. }));
        assert!(repo.list_schedule(1, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_reports_under_provisioning() {
        let repo = repo_with(&[(1, 1, 1, 3)], 2);
        let outcome = generator(
            &repo,
            FixedSolver(SolveOutcome::Unavailable(UnavailableReason::Status(503))),
        )
        .generate(1, &serde_json::Value::Null)
        .await
        .unwrap();
        assert_eq!(outcome.engine, Engine::Fallback);
        assert_eq!(outcome.total, 2);
        let short: Vec<_> = outcome.under_provisioned().collect();
        assert_eq!(short.len(), 1);
        assert_eq!((short[0].delivered, short[0].target), (2, 3));
    }

    /// Reads from the wrapped repository, refuses every write.
    struct ReadOnly(LocalRepository);

    #[async_trait]
    impl TimetableRepository for ReadOnly {
        async fn health_check(&self) -> crate::error::RepositoryResult<bool> {
            self.0.health_check().await
        }

        async fn get_period(&self, period_id: PeriodId) -> crate::error::RepositoryResult<Period> {
            self.0.get_period(period_id).await
        }

        async fn obligations_for_period(
            &self,
            period_id: PeriodId,
        ) -> crate::error::RepositoryResult<Vec<TeachingObligation>> {
            self.0.obligations_for_period(period_id).await
        }

        async fn time_slots_for_period(
            &self,
            period_id: PeriodId,
        ) -> crate::error::RepositoryResult<Vec<TimeSlot>> {
            self.0.time_slots_for_period(period_id).await
        }

        async fn replace_schedule(
            &self,
            _period_id: PeriodId,
            _entries: &[ScheduleEntry],
        ) -> crate::error::RepositoryResult<usize> {
            Err(RepositoryError::Connection("commit failed".into()))
        }

        async fn list_schedule(
            &self,
            period_id: PeriodId,
            class_group_id: Option<crate::data::ClassGroupId>,
        ) -> crate::error::RepositoryResult<Vec<ScheduleEntry>> {
            self.0.list_schedule(period_id, class_group_id).await
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_previous_schedule() {
        let repo = repo_with(&[(1, 1, 1, 1)], 2);
        generator(&repo, DisabledSolver)
            .generate(1, &serde_json::Value::Null)
            .await
            .unwrap();
        let before = repo.list_schedule(1, None).await.unwrap();
        assert_eq!(before.len(), 1);

        let failing = TimetableGenerator::new(Arc::new(ReadOnly(repo.clone())), Arc::new(DisabledSolver));
        let err = failing
            .generate(1, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Persistence(_)));
        assert_eq!(err.reason(), "failed to persist schedule");
        assert_eq!(repo.list_schedule(1, None).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_unhealthy_store_fails_before_solving() {
        let repo = repo_with(&[(1, 1, 1, 1)], 2);
        repo.set_healthy(false);
        let err = generator(&repo, DisabledSolver)
            .generate(1, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Read(_)));
    }
}
