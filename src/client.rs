//! Adapter for the external optimizing solver.
//!
//! The solver is reached with a single bounded request per generation run.
//! Anything short of a well-formed, constraint-satisfying, non-empty answer
//! comes back as [`SolveOutcome::Unavailable`]; this module never fails a run.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;

use crate::data::{
    PeriodId, ScheduleEntry, SolverPlacement, SolverRequest, SolverResponse, TeachingObligation,
    TimeSlot,
};
use crate::validator::{Violation, validate_schedule};

/// Path of the generation endpoint, relative to the solver base URL.
pub const GENERATE_PATH: &str = "/schedule/generate";

/// Why the external solver produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// No solver is configured.
    Disabled,
    Timeout,
    /// Connection refused, DNS failure, reset, ...
    Transport(String),
    /// Non-success HTTP status.
    Status(u16),
    /// Body could not be parsed as a solver response.
    Malformed(String),
    /// Parsed, but no complete placements.
    Empty,
    /// Placements break hard constraints.
    Invalid(Vec<Violation>),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::Disabled => write!(f, "no solver configured"),
            UnavailableReason::Timeout => write!(f, "request timed out"),
            UnavailableReason::Transport(msg) => write!(f, "transport error: {msg}"),
            UnavailableReason::Status(code) => write!(f, "solver answered with status {code}"),
            UnavailableReason::Malformed(msg) => write!(f, "malformed response: {msg}"),
            UnavailableReason::Empty => write!(f, "solver proposed an empty schedule"),
            UnavailableReason::Invalid(violations) => {
                write!(f, "solver schedule has {} violation(s)", violations.len())
            }
        }
    }
}

/// Outcome of asking a solver for a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveOutcome {
    Solved(Vec<ScheduleEntry>),
    Unavailable(UnavailableReason),
}

/// A capability that may propose a schedule for a period.
#[async_trait]
pub trait ScheduleSolver: Send + Sync {
    async fn solve(
        &self,
        period_id: PeriodId,
        obligations: &[TeachingObligation],
        slots: &[TimeSlot],
        constraints: &serde_json::Value,
    ) -> SolveOutcome;
}

/// Solver used when no external service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSolver;

#[async_trait]
impl ScheduleSolver for DisabledSolver {
    async fn solve(
        &self,
        _period_id: PeriodId,
        _obligations: &[TeachingObligation],
        _slots: &[TimeSlot],
        _constraints: &serde_json::Value,
    ) -> SolveOutcome {
        SolveOutcome::Unavailable(UnavailableReason::Disabled)
    }
}

/// Calls the solver service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSolverClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSolverClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), GENERATE_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, request: &SolverRequest) -> Result<SolverResponse, UnavailableReason> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UnavailableReason::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(classify_transport)?;
        serde_json::from_slice(&body).map_err(|e| UnavailableReason::Malformed(e.to_string()))
    }
}

fn classify_transport(err: reqwest::Error) -> UnavailableReason {
    if err.is_timeout() {
        UnavailableReason::Timeout
    } else {
        UnavailableReason::Transport(err.to_string())
    }
}

#[async_trait]
impl ScheduleSolver for HttpSolverClient {
    async fn solve(
        &self,
        period_id: PeriodId,
        obligations: &[TeachingObligation],
        slots: &[TimeSlot],
        constraints: &serde_json::Value,
    ) -> SolveOutcome {
        let request = SolverRequest {
            period_id,
            teaching_assignments: obligations.to_vec(),
            time_slots: slots.to_vec(),
            constraints: constraints.clone(),
        };
        debug!(
            "Requesting schedule for period {} from {} ({} obligations, {} slots)",
            period_id,
            self.endpoint,
            obligations.len(),
            slots.len()
        );

        let outcome = match self.request(&request).await {
            Ok(response) => accept_response(period_id, response, obligations, slots),
            Err(reason) => SolveOutcome::Unavailable(reason),
        };

        match &outcome {
            SolveOutcome::Solved(entries) => {
                info!("Solver proposed {} entries for period {}", entries.len(), period_id)
            }
            SolveOutcome::Unavailable(reason) => {
                warn!("Solver unavailable for period {}: {}", period_id, reason)
            }
        }
        outcome
    }
}

/// Turns a parsed solver response into a usable schedule, or explains why not.
pub fn accept_response(
    period_id: PeriodId,
    response: SolverResponse,
    obligations: &[TeachingObligation],
    slots: &[TimeSlot],
) -> SolveOutcome {
    let entries = normalize_placements(period_id, response.schedule);
    if entries.is_empty() {
        return SolveOutcome::Unavailable(UnavailableReason::Empty);
    }
    match validate_schedule(&entries, obligations, slots) {
        Ok(()) => SolveOutcome::Solved(entries),
        Err(violations) => SolveOutcome::Unavailable(UnavailableReason::Invalid(violations)),
    }
}

/// Keeps placements that name a class group, slot and obligation; tags them
/// with the requested period.
pub fn normalize_placements(
    period_id: PeriodId,
    placements: Vec<SolverPlacement>,
) -> Vec<ScheduleEntry> {
    placements
        .into_iter()
        .filter_map(|p| {
            Some(ScheduleEntry {
                period_id,
                class_group_id: p.class_group_id?,
                time_slot_id: p.time_slot_id?,
                obligation_id: p.teaching_assignment_id?,
                room: p.room.filter(|room| !room.is_empty()),
            })
        })
        .collect()
}
