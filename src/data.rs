use chrono::{DateTime, NaiveTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// Type aliases for clarity
pub type PeriodId = i64;
pub type TeacherId = i64;
pub type SubjectId = i64;
pub type ClassGroupId = i64;
pub type ObligationId = i64;
pub type TimeSlotId = i64;

/// An academic term bounding which slots and obligations are scheduled together.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Period {
    pub id: PeriodId,
    #[serde(default)]
    pub name: String,
}

/// School day of a recurring slot, Monday (1) through Saturday (6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Weekday {
    Monday = 1,
    Tuesday = 2,
    Wednesday = 3,
    Thursday = 4,
    Friday = 5,
    Saturday = 6,
}

impl TryFrom<u8> for Weekday {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Weekday::Monday),
            2 => Ok(Weekday::Tuesday),
            3 => Ok(Weekday::Wednesday),
            4 => Ok(Weekday::Thursday),
            5 => Ok(Weekday::Friday),
            6 => Ok(Weekday::Saturday),
            other => Err(format!("day_of_week must be between 1 and 6, got {other}")),
        }
    }
}

impl From<Weekday> for u8 {
    fn from(day: Weekday) -> Self {
        day as u8
    }
}

/// "This teacher teaches this subject to this class group, N hours a week."
///
/// Serialized field names double as the solver request's `teaching_assignments` shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TeachingObligation {
    pub id: ObligationId,
    pub teacher_id: TeacherId,
    pub subject_id: SubjectId,
    pub class_group_id: ClassGroupId,
    pub period_id: PeriodId,
    pub weekly_hours: u32,
}

/// A recurring weekly interval `[start_time, end_time)` available for lessons.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeSlot {
    pub id: TimeSlotId,
    pub period_id: PeriodId,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub label: Option<String>,
}

/// One placement of an obligation into a time slot. Entries have no identity
/// of their own; a period's schedule is always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct ScheduleEntry {
    pub period_id: PeriodId,
    pub class_group_id: ClassGroupId,
    pub time_slot_id: TimeSlotId,
    pub obligation_id: ObligationId,
    #[serde(default)]
    pub room: Option<String>,
}

/// A stored entry together with the slot and obligation it refers to, as the
/// schedule listing returns it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScheduledLesson {
    #[serde(flatten)]
    pub entry: ScheduleEntry,
    pub time_slot: Option<TimeSlot>,
    pub teaching_assignment: Option<TeachingObligation>,
}

/// Which path produced a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    External,
    Fallback,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::External => write!(f, "external"),
            Engine::Fallback => write!(f, "fallback"),
        }
    }
}

/// Delivered versus target hours for one obligation after a generation run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObligationFulfillment {
    pub obligation_id: ObligationId,
    pub class_group_id: ClassGroupId,
    pub teacher_id: TeacherId,
    pub target: u32,
    pub delivered: u32,
}

impl ObligationFulfillment {
    pub fn is_fully_scheduled(&self) -> bool {
        self.delivered >= self.target
    }
}

/// The request sent to the optimizing solver service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolverRequest {
    pub period_id: PeriodId,
    pub teaching_assignments: Vec<TeachingObligation>,
    pub time_slots: Vec<TimeSlot>,
    /// Caller-supplied and opaque to the engine; forwarded verbatim.
    #[serde(default)]
    pub constraints: serde_json::Value,
}

/// Reads a field of a solver reply, treating an unreadable value as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Reads a list of a solver reply, skipping items that do not parse.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect()),
        _ => Ok(Vec::new()),
    }
}

/// Rooms arrive as names or numbers; anything else means no room.
fn lenient_room<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(room) => Some(room),
        serde_json::Value::Number(room) => Some(room.to_string()),
        _ => None,
    })
}

/// A single proposed placement. Accepts snake_case and camelCase keys;
/// placements missing any identifier are dropped during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SolverPlacement {
    #[serde(
        default,
        deserialize_with = "lenient",
        alias = "classGroupId",
        alias = "rombel_id",
        alias = "rombelId"
    )]
    pub class_group_id: Option<ClassGroupId>,
    #[serde(default, deserialize_with = "lenient", alias = "timeSlotId")]
    pub time_slot_id: Option<TimeSlotId>,
    #[serde(default, deserialize_with = "lenient", alias = "teachingAssignmentId")]
    pub teaching_assignment_id: Option<ObligationId>,
    #[serde(default, deserialize_with = "lenient_room")]
    pub room: Option<String>,
}

/// Input sizes echoed back by the solver service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SolverSummary {
    pub teaching_assignments: usize,
    pub time_slots: usize,
}

/// Describes a soft constraint that was not met in the final schedule.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UnmetSoftConstraint {
    pub constraint_type: String,
    pub description: String,
}

impl fmt::Display for UnmetSoftConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.constraint_type, self.description)
    }
}

/// The solver service's answer. Only `schedule` matters to the engine, so
/// metadata that does not parse is read as absent instead of failing the reply.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SolverResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient")]
    pub period_id: Option<PeriodId>,
    #[serde(default, deserialize_with = "lenient")]
    pub summary: Option<SolverSummary>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub schedule: Vec<SolverPlacement>,
    #[serde(default, deserialize_with = "lenient")]
    pub score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub unmet_soft_constraints: Vec<UnmetSoftConstraint>,
}
