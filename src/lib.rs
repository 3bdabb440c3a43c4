//! Timetable generation for school academic periods.
//!
//! A period's teaching obligations are placed into its weekly time slots,
//! first by asking an external optimizing solver and, when that yields
//! nothing usable, by a deterministic greedy packer. The result is checked
//! against the hard constraints and stored with replace-all semantics.

pub mod client;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod packer;
pub mod repository;
pub mod server;
pub mod solver;
pub mod validator;

pub use client::{DisabledSolver, HttpSolverClient, ScheduleSolver, SolveOutcome, UnavailableReason};
pub use config::Config;
pub use data::{
    Engine, ObligationFulfillment, Period, ScheduleEntry, ScheduledLesson, TeachingObligation,
    TimeSlot, Weekday,
};
pub use engine::{GenerationOutcome, GenerationState, TimetableGenerator};
pub use error::{ConfigError, GenerationError, RepositoryError, RepositoryResult};
pub use repository::{LocalRepository, Seed, TimetableRepository};
