//! envfix core library
//!
//! Deterministic repair engine for package-environment creation: spec
//! domain types, failure classification, compatibility rules, the bounded
//! repair state machine, and the retry controller that drives it.

pub mod classifier;
pub mod compat;
pub mod controller;
pub mod domain;
pub mod manifest;
pub mod obs;
pub mod proposer;
pub mod repair;
pub mod root;
pub mod strategy;
pub mod telemetry;

pub use domain::{
    major_minor, sanitize_env_name, AttemptOutcome, ConstraintOp, DependencyEntry,
    DependencySource, EnvfixError, EnvironmentSpec, ErrorKind, ErrorReport, FixAttempt,
    RepairHistory, Result, StrategyId, VersionConstraint,
};

pub use classifier::classify;
pub use compat::{resolve_compat, CompatRule, CompatRuleSet};
pub use controller::{
    read_repair_artifact, write_repair_artifact, CreateResult, EnvironmentCreator, RepairOutcome,
    RepairReport, RetryController,
};
pub use manifest::{parse as parse_manifest, render as render_manifest};
pub use proposer::{FixProposer, NullProposer, RuleBasedProposer};
pub use repair::{EscalationTable, FixProposal, RepairState, RepairStateMachine};
pub use root::{RootCandidate, RootResolver, DEFAULT_MAX_DEPTH};
pub use strategy::{apply as apply_strategy, vendor_channel_for};

pub use obs::{
    emit_attempt_failed, emit_attempt_started, emit_fix_applied, emit_repair_finished, RepairSpan,
};
pub use telemetry::init_tracing;

/// envfix version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
