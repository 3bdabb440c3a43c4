//! Error types for the timetable engine.
//!
//! Solver unavailability is deliberately absent here: it is an ordinary
//! outcome (`client::SolveOutcome::Unavailable`) that routes generation to the
//! fallback packer, never an error surfaced to the caller.

use crate::data::PeriodId;
use crate::validator::Violation;

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Error type for repository operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage could not be reached. Nothing was read or written.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A write was rejected as a whole because one of its rows was invalid.
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a generation run ended in `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("period {0} does not exist")]
    PeriodNotFound(PeriodId),

    #[error("incomplete input data: period {period_id} has {obligations} obligations and {slots} time slots")]
    IncompleteInput {
        period_id: PeriodId,
        obligations: usize,
        slots: usize,
    },

    #[error("no feasible schedule produced for period {0}")]
    NoFeasibleSchedule(PeriodId),

    /// The candidate schedule broke a hard constraint after solving. Only a
    /// misbehaving external solver can get here.
    #[error("schedule for period {period_id} violates {} hard constraint(s)", .violations.len())]
    InvalidSchedule {
        period_id: PeriodId,
        violations: Vec<Violation>,
    },

    #[error("failed to read inputs: {0}")]
    Read(#[source] RepositoryError),

    #[error("failed to persist schedule: {0}")]
    Persistence(#[source] RepositoryError),
}

impl GenerationError {
    /// Short, stable reason suitable for the caller-facing message.
    pub fn reason(&self) -> &'static str {
        match self {
            GenerationError::PeriodNotFound(_) => "period not found",
            GenerationError::IncompleteInput { .. } => "incomplete input data",
            GenerationError::NoFeasibleSchedule(_) => "no feasible schedule produced",
            GenerationError::InvalidSchedule { .. } => "solver returned an invalid schedule",
            GenerationError::Read(_) => "failed to read input data",
            GenerationError::Persistence(_) => "failed to persist schedule",
        }
    }
}

/// Bad configuration value in the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_input_reason_is_stable() {
        let err = GenerationError::IncompleteInput {
            period_id: 3,
            obligations: 2,
            slots: 0,
        };
        assert_eq!(err.reason(), "incomplete input data");
        assert!(err.to_string().contains("0 time slots"));
    }

    #[test]
    fn persistence_error_keeps_source() {
        let err = GenerationError::Persistence(RepositoryError::Connection("down".into()));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Connection error: down"));
    }
}
