//! Retry controller: wires the state machine to the external creation and
//! fix-proposal collaborators and records history.
//!
//! Also provides the auditable repair artifact (`repair.json` plus a digest
//! sidecar) written once the loop terminates.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classifier;
use crate::domain::{EnvfixError, EnvironmentSpec, RepairHistory, Result};
use crate::obs;
use crate::proposer::FixProposer;
use crate::repair::{EscalationTable, RepairState, RepairStateMachine};

/// Result of one environment-creation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResult {
    pub success: bool,
    pub raw_error: String,
}

impl CreateResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            raw_error: String::new(),
        }
    }

    pub fn failed(raw_error: impl Into<String>) -> Self {
        Self {
            success: false,
            raw_error: raw_error.into(),
        }
    }
}

/// External collaborator that attempts to create the environment.
///
/// Implementations are expected to be exclusive per environment name and
/// not re-entrant; the controller never runs attempts concurrently.
#[async_trait]
pub trait EnvironmentCreator: Send + Sync {
    async fn create(&self, spec: &EnvironmentSpec) -> CreateResult;
}

/// Terminal outcome of a repair run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    Succeeded,
    Exhausted,
    FailedNonRetryable,
}

/// Full record of a repair run, for diagnostics and artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub run_id: String,
    pub outcome: RepairOutcome,
    /// Final spec on success; the last spec tried on failure.
    pub spec: EnvironmentSpec,
    pub history: RepairHistory,
    pub attempts_used: u32,
    pub max_attempts: u32,
    pub evaluated_at: DateTime<Utc>,
}

/// Drives [`RepairStateMachine`] attempt by attempt.
#[derive(Debug, Clone)]
pub struct RetryController {
    max_retries: u32,
    table: EscalationTable,
}

impl RetryController {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            table: EscalationTable::default(),
        }
    }

    pub fn with_table(mut self, table: EscalationTable) -> Self {
        self.table = table;
        self
    }

    /// Run the bounded repair loop to one of its three terminal outcomes.
    ///
    /// Attempts are strictly sequential; every failure is classified,
    /// handed to the proposer, and absorbed by the state machine. No error
    /// propagates out of the loop.
    pub async fn run<C, P>(
        &self,
        run_id: &str,
        initial: EnvironmentSpec,
        creator: &C,
        proposer: &P,
    ) -> RepairReport
    where
        C: EnvironmentCreator + ?Sized,
        P: FixProposer + ?Sized,
    {
        let mut machine =
            RepairStateMachine::new(initial, self.max_retries).with_table(self.table.clone());
        let mut history = RepairHistory::new();

        while let Some(attempt) = machine.begin_attempt() {
            obs::emit_attempt_started(run_id, attempt, self.max_retries);

            let result = creator.create(machine.spec()).await;
            if result.success {
                machine.record_success();
                break;
            }

            let report = classifier::classify(&result.raw_error, attempt);
            obs::emit_attempt_failed(run_id, attempt, report.kind, report.package.as_deref());

            let proposal = proposer.propose(machine.spec(), &report, &history).await;
            let entry = machine.absorb_failure(report, proposal, &history);
            obs::emit_fix_applied(run_id, attempt, entry.strategy, entry.outcome);
            history.push(entry);

            if machine.state().is_terminal() {
                break;
            }
        }

        let outcome = match machine.state() {
            RepairState::Succeeded => RepairOutcome::Succeeded,
            RepairState::FailedNonRetryable => RepairOutcome::FailedNonRetryable,
            _ => RepairOutcome::Exhausted,
        };
        let attempts_used = machine.attempts_used();
        obs::emit_repair_finished(run_id, outcome, attempts_used);

        RepairReport {
            run_id: run_id.to_string(),
            outcome,
            spec: machine.into_spec(),
            history,
            attempts_used,
            max_attempts: self.max_retries,
            evaluated_at: Utc::now(),
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Persist `<dir>/<run_id>/repair.json` and `<dir>/<run_id>/repair.digest`.
pub fn write_repair_artifact(report: &RepairReport, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&report.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let artifact_path = run_dir.join("repair.json");
    let digest_path = run_dir.join("repair.digest");
    let json = serde_json::to_vec_pretty(report)?;
    let digest = sha256_hex(&json);

    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, digest.as_bytes())?;

    Ok(artifact_path)
}

/// Read and verify `<dir>/<run_id>/repair.json` integrity.
pub fn read_repair_artifact(run_id: &str, dir: &Path) -> Result<RepairReport> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join("repair.json"))?;
    let digest = std::fs::read_to_string(run_dir.join("repair.digest"))?;

    let actual = sha256_hex(&json);
    if digest.trim() != actual {
        return Err(EnvfixError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}
