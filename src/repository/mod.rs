//! Storage boundary for timetable generation.
//!
//! The engine reads a period's obligations and slots through
//! [`TimetableRepository`] and writes exactly one thing back: the period's
//! complete schedule, via [`TimetableRepository::replace_schedule`].

pub mod local;

pub use local::{LocalRepository, Seed};

use async_trait::async_trait;

use crate::data::{ClassGroupId, Period, PeriodId, ScheduleEntry, TeachingObligation, TimeSlot};
use crate::error::RepositoryResult;

/// Repository trait for timetable storage.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` so one repository can be shared by
/// concurrent generation runs for different periods.
#[async_trait]
pub trait TimetableRepository: Send + Sync {
    /// Check if the storage backend is reachable.
    async fn health_check(&self) -> RepositoryResult<bool>;

    /// Fetch a period.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the period doesn't exist
    async fn get_period(&self, period_id: PeriodId) -> RepositoryResult<Period>;

    /// All teaching obligations of a period, ordered by id. Empty if none.
    async fn obligations_for_period(
        &self,
        period_id: PeriodId,
    ) -> RepositoryResult<Vec<TeachingObligation>>;

    /// All time slots of a period, ordered by id. Empty if none.
    async fn time_slots_for_period(&self, period_id: PeriodId) -> RepositoryResult<Vec<TimeSlot>>;

    /// Atomically replace the period's schedule with `entries`.
    ///
    /// Deleting the old rows and inserting the new ones form one transaction:
    /// on error the previous schedule is still the one readers see.
    ///
    /// # Returns
    /// * `Ok(count)` - Number of entries written
    async fn replace_schedule(
        &self,
        period_id: PeriodId,
        entries: &[ScheduleEntry],
    ) -> RepositoryResult<usize>;

    /// Persisted entries of a period, optionally for a single class group,
    /// ordered by class group, day and start time.
    async fn list_schedule(
        &self,
        period_id: PeriodId,
        class_group_id: Option<ClassGroupId>,
    ) -> RepositoryResult<Vec<ScheduleEntry>>;
}

/// Everything generation needs to know about one period.
#[derive(Debug, Clone)]
pub struct PeriodInputs {
    pub period: Period,
    pub obligations: Vec<TeachingObligation>,
    pub time_slots: Vec<TimeSlot>,
}

/// Loads a period's obligations and slots.
///
/// Fails with `NotFound` when the period does not exist. Empty collections
/// are returned as-is; deciding whether they are usable is up to the caller.
pub async fn load_inputs(
    repo: &dyn TimetableRepository,
    period_id: PeriodId,
) -> RepositoryResult<PeriodInputs> {
    let period = repo.get_period(period_id).await?;
    let (obligations, time_slots) = tokio::try_join!(
        repo.obligations_for_period(period_id),
        repo.time_slots_for_period(period_id)
    )?;

    Ok(PeriodInputs {
        period,
        obligations,
        time_slots,
    })
}
