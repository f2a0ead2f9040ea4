//! Domain models for envfix.
//!
//! Canonical definitions for the core entities:
//! - `EnvironmentSpec`: the package environment under repair
//! - `ErrorReport` / `ErrorKind`: classified creation failures
//! - `FixAttempt` / `RepairHistory`: the append-only repair timeline

pub mod error;
pub mod history;
pub mod spec;

// Re-export main types and errors
pub use error::{EnvfixError, Result};
pub use history::{
    AttemptOutcome, ErrorKind, ErrorReport, FixAttempt, RepairHistory, StrategyId,
};
pub use spec::{
    major_minor, sanitize_env_name, ConstraintOp, DependencyEntry, DependencySource,
    EnvironmentSpec, VersionConstraint,
};
