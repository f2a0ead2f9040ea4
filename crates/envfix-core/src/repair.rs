//! Bounded repair state machine.
//!
//! Drives `Pending -> Attempting -> {Succeeded | Attempting'}` with two
//! failure terminals: `Exhausted` when the attempt ceiling is reached and
//! `FailedNonRetryable` when a failure recurs after its escalation ladder
//! ran dry. Every failure is absorbed into a state transition; nothing
//! escapes the loop as an unhandled fault.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{
    AttemptOutcome, EnvironmentSpec, ErrorKind, ErrorReport, FixAttempt, RepairHistory, StrategyId,
};
use crate::strategy;

/// A candidate fix returned by a proposer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixProposal {
    pub strategy: StrategyId,
    pub spec: EnvironmentSpec,
}

/// Per-error-kind escalation ladders.
///
/// Each ladder is an ordered sequence of increasingly permissive strategies;
/// each strategy is used at most once per escalation cycle for a given
/// failure key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationTable {
    ladders: HashMap<ErrorKind, Vec<StrategyId>>,
}

impl EscalationTable {
    /// Override the ladder for one error kind (builder pattern).
    pub fn with_ladder(mut self, kind: ErrorKind, ladder: Vec<StrategyId>) -> Self {
        self.ladders.insert(kind, ladder);
        self
    }

    pub fn ladder(&self, kind: ErrorKind) -> &[StrategyId] {
        self.ladders.get(&kind).map_or(&[], Vec::as_slice)
    }
}

impl Default for EscalationTable {
    fn default() -> Self {
        let mut ladders = HashMap::new();
        ladders.insert(
            ErrorKind::PackageNotFound,
            vec![
                StrategyId::AddVendorChannel,
                StrategyId::RelaxToLowerBound,
                StrategyId::DropConstraint,
                StrategyId::RemoveDependency,
            ],
        );
        ladders.insert(
            ErrorKind::VersionConflict,
            vec![
                StrategyId::RelaxToLowerBound,
                StrategyId::DropConstraint,
                StrategyId::RemoveDependency,
            ],
        );
        ladders.insert(
            ErrorKind::UnsatisfiableDependencies,
            vec![StrategyId::RelaxAllConstraints, StrategyId::PinInterpreter],
        );
        ladders.insert(
            ErrorKind::PlatformIncompatible,
            vec![StrategyId::MoveToPip, StrategyId::RemoveDependency],
        );
        ladders.insert(
            ErrorKind::Unknown,
            vec![StrategyId::PinInterpreter, StrategyId::RelaxAllConstraints],
        );
        Self { ladders }
    }
}

/// State of the repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairState {
    Pending,
    Attempting,
    Succeeded,
    Exhausted,
    FailedNonRetryable,
}

impl RepairState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RepairState::Succeeded | RepairState::Exhausted | RepairState::FailedNonRetryable
        )
    }
}

/// Key under which escalation progress is tracked.
///
/// Unknown failures additionally carry a digest of their raw text, so a
/// stream of unrelated unknown errors does not share one ladder while a
/// genuinely repeating unknown error still exhausts its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EscalationKey {
    kind: ErrorKind,
    package: Option<String>,
    fingerprint: Option<String>,
}

impl EscalationKey {
    fn for_report(report: &ErrorReport) -> Self {
        let fingerprint = (report.kind == ErrorKind::Unknown).then(|| {
            let digest = Sha256::digest(report.raw.as_bytes());
            hex::encode(&digest[..8])
        });
        Self {
            kind: report.kind,
            package: report.package.clone(),
            fingerprint,
        }
    }
}

/// The bounded retry/escalation state machine.
///
/// Owns the spec exclusively for the duration of the loop; callers interact
/// through [`begin_attempt`](Self::begin_attempt),
/// [`record_success`](Self::record_success) and
/// [`absorb_failure`](Self::absorb_failure).
#[derive(Debug)]
pub struct RepairStateMachine {
    spec: EnvironmentSpec,
    state: RepairState,
    attempts_used: u32,
    max_attempts: u32,
    table: EscalationTable,
    cursors: HashMap<EscalationKey, usize>,
}

impl RepairStateMachine {
    pub fn new(spec: EnvironmentSpec, max_attempts: u32) -> Self {
        Self {
            spec,
            state: RepairState::Pending,
            attempts_used: 0,
            max_attempts,
            table: EscalationTable::default(),
            cursors: HashMap::new(),
        }
    }

    pub fn with_table(mut self, table: EscalationTable) -> Self {
        self.table = table;
        self
    }

    pub fn spec(&self) -> &EnvironmentSpec {
        &self.spec
    }

    /// Hand the spec back once the loop is over.
    pub fn into_spec(self) -> EnvironmentSpec {
        self.spec
    }

    pub fn state(&self) -> RepairState {
        self.state
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    /// Start the next creation attempt, consuming one unit of the budget.
    ///
    /// Returns the 1-based attempt index, or `None` when the machine is
    /// terminal or the budget is spent (transitioning to `Exhausted`).
    pub fn begin_attempt(&mut self) -> Option<u32> {
        if self.state.is_terminal() {
            return None;
        }
        if self.attempts_used >= self.max_attempts {
            self.state = RepairState::Exhausted;
            return None;
        }
        self.attempts_used += 1;
        self.state = RepairState::Attempting;
        Some(self.attempts_used)
    }

    /// The current attempt's creation call succeeded.
    pub fn record_success(&mut self) {
        self.state = RepairState::Succeeded;
    }

    /// Absorb a creation failure: decide on a fix, apply it to the owned
    /// spec, and return the history entry describing the decision.
    ///
    /// The caller passes the (possibly absent) external proposal and the
    /// history so far; the returned entry must be appended to that history.
    pub fn absorb_failure(
        &mut self,
        report: ErrorReport,
        proposal: Option<FixProposal>,
        history: &RepairHistory,
    ) -> FixAttempt {
        // Final attempt: no fix is useful, the budget is spent.
        if self.attempts_used >= self.max_attempts {
            self.state = RepairState::Exhausted;
            return self.entry(report, None, AttemptOutcome::Skipped);
        }

        let key = EscalationKey::for_report(&report);
        let ladder = self.table.ladder(report.kind).to_vec();
        let mut cursor = self.cursors.get(&key).copied().unwrap_or(0);

        // The identical failure came back after its ladder ran dry: stop
        // instead of repeating futile fixes, even with attempts remaining.
        if cursor >= ladder.len() && !ladder.is_empty() {
            self.state = RepairState::FailedNonRetryable;
            return self.entry(report, None, AttemptOutcome::Failed);
        }

        // An external candidate is taken when it is structurally valid,
        // actually changes the spec, and does not repeat the immediately
        // preceding strategy for the same failure.
        if let Some(candidate) = proposal {
            let acceptable = candidate.spec.validate().is_ok()
                && candidate.spec != self.spec
                && !history.repeats_last(
                    candidate.strategy,
                    report.kind,
                    report.package.as_deref(),
                );
            if acceptable {
                if let Some(pos) = ladder.iter().position(|s| *s == candidate.strategy) {
                    if pos >= cursor {
                        cursor = pos + 1;
                    }
                }
                self.cursors.insert(key, cursor);
                self.spec = candidate.spec.clone();
                return self.entry_with_spec(
                    report,
                    Some(candidate.strategy),
                    candidate.spec,
                    AttemptOutcome::Succeeded,
                );
            }
        }

        // Ladder fallback: walk from the cursor, consuming each strategy
        // whether or not it applied.
        while cursor < ladder.len() {
            let candidate = ladder[cursor];
            cursor += 1;
            if history.repeats_last(candidate, report.kind, report.package.as_deref()) {
                continue;
            }
            if let Some(fixed) = strategy::apply(&self.spec, &report, candidate) {
                self.cursors.insert(key, cursor);
                self.spec = fixed.clone();
                return self.entry_with_spec(
                    report,
                    Some(candidate),
                    fixed,
                    AttemptOutcome::Succeeded,
                );
            }
        }

        // Nothing applied this cycle; retry the unchanged spec. The next
        // recurrence of this key hits the exhaustion check above.
        self.cursors.insert(key, cursor);
        self.entry(report, None, AttemptOutcome::Failed)
    }

    fn entry(
        &self,
        report: ErrorReport,
        strategy: Option<StrategyId>,
        outcome: AttemptOutcome,
    ) -> FixAttempt {
        self.entry_with_spec(report, strategy, self.spec.clone(), outcome)
    }

    fn entry_with_spec(
        &self,
        report: ErrorReport,
        strategy: Option<StrategyId>,
        spec: EnvironmentSpec,
        outcome: AttemptOutcome,
    ) -> FixAttempt {
        FixAttempt {
            attempt: self.attempts_used,
            report,
            strategy,
            spec,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DependencyEntry, DependencySource};

    fn cudnn_spec() -> EnvironmentSpec {
        let mut spec = EnvironmentSpec::new("demo");
        spec.dependencies.push(
            DependencyEntry::parse("cudnn=8.6", DependencySource::Native).unwrap(),
        );
        spec
    }

    fn cudnn_report(attempt: u32) -> ErrorReport {
        ErrorReport {
            raw: "package not found: cudnn=8.6".to_string(),
            kind: ErrorKind::PackageNotFound,
            package: Some("cudnn".to_string()),
            attempt,
        }
    }

    #[test]
    fn test_begin_attempt_respects_bound() {
        let mut machine = RepairStateMachine::new(cudnn_spec(), 2);
        assert_eq!(machine.begin_attempt(), Some(1));
        assert_eq!(machine.begin_attempt(), Some(2));
        assert_eq!(machine.begin_attempt(), None);
        assert_eq!(machine.state(), RepairState::Exhausted);
    }

    #[test]
    fn test_terminal_states_stop_attempts() {
        let mut machine = RepairStateMachine::new(cudnn_spec(), 5);
        machine.begin_attempt();
        machine.record_success();
        assert_eq!(machine.state(), RepairState::Succeeded);
        assert_eq!(machine.begin_attempt(), None);
    }

    #[test]
    fn test_ladder_walks_in_order_then_fails_nonretryable() {
        let mut machine = RepairStateMachine::new(cudnn_spec(), 10);
        let mut history = RepairHistory::new();

        let expected = [
            (StrategyId::AddVendorChannel, "cudnn=8.6"),
            (StrategyId::RelaxToLowerBound, "cudnn>=8.0"),
            (StrategyId::DropConstraint, "cudnn"),
        ];

        for (i, (strategy, rendered)) in expected.iter().enumerate() {
            let attempt = machine.begin_attempt().unwrap();
            let entry = machine.absorb_failure(cudnn_report(attempt), None, &history);
            assert_eq!(entry.strategy, Some(*strategy), "step {i}");
            assert_eq!(entry.outcome, AttemptOutcome::Succeeded);
            assert_eq!(
                machine.spec().find_dependency("cudnn").unwrap().render(),
                *rendered
            );
            history.push(entry);
        }

        // Step 4 removes the dependency entirely.
        let attempt = machine.begin_attempt().unwrap();
        let entry = machine.absorb_failure(cudnn_report(attempt), None, &history);
        assert_eq!(entry.strategy, Some(StrategyId::RemoveDependency));
        assert!(machine.spec().find_dependency("cudnn").is_none());
        history.push(entry);

        // A fifth recurrence of the same failure is non-retryable.
        let attempt = machine.begin_attempt().unwrap();
        let entry = machine.absorb_failure(cudnn_report(attempt), None, &history);
        assert_eq!(entry.outcome, AttemptOutcome::Failed);
        assert_eq!(machine.state(), RepairState::FailedNonRetryable);
    }

    #[test]
    fn test_candidate_repeating_last_strategy_is_rejected() {
        let mut machine = RepairStateMachine::new(cudnn_spec(), 10);
        let mut history = RepairHistory::new();

        let attempt = machine.begin_attempt().unwrap();
        let entry = machine.absorb_failure(cudnn_report(attempt), None, &history);
        assert_eq!(entry.strategy, Some(StrategyId::AddVendorChannel));
        history.push(entry);

        // Proposer insists on adding the channel again; the machine must
        // escalate to the next ladder strategy instead.
        let mut stale = machine.spec().clone();
        stale.channels.push("bioconda".to_string());
        let proposal = FixProposal {
            strategy: StrategyId::AddVendorChannel,
            spec: stale,
        };

        let attempt = machine.begin_attempt().unwrap();
        let entry = machine.absorb_failure(cudnn_report(attempt), Some(proposal), &history);
        assert_eq!(entry.strategy, Some(StrategyId::RelaxToLowerBound));
    }

    #[test]
    fn test_invalid_candidate_forces_escalation() {
        let mut machine = RepairStateMachine::new(cudnn_spec(), 10);
        let history = RepairHistory::new();

        let mut broken = machine.spec().clone();
        broken.name = "9bad name".to_string();
        let proposal = FixProposal {
            strategy: StrategyId::ModelSuggested,
            spec: broken,
        };

        let attempt = machine.begin_attempt().unwrap();
        let entry = machine.absorb_failure(cudnn_report(attempt), Some(proposal), &history);
        assert_eq!(entry.strategy, Some(StrategyId::AddVendorChannel));
    }

    #[test]
    fn test_unrelated_unknown_errors_get_fresh_ladders() {
        let mut spec = cudnn_spec();
        spec.dependencies.push(
            DependencyEntry::parse("python=3.11", DependencySource::Native).unwrap(),
        );
        let mut machine = RepairStateMachine::new(spec, 10);
        let mut history = RepairHistory::new();

        for i in 0..4 {
            let attempt = machine.begin_attempt().unwrap();
            let report = ErrorReport {
                raw: format!("unexplained failure #{i}"),
                kind: ErrorKind::Unknown,
                package: None,
                attempt,
            };
            let entry = machine.absorb_failure(report, None, &history);
            history.push(entry);
            assert!(!machine.state().is_terminal(), "iteration {i}");
        }
    }

    #[test]
    fn test_repeating_unknown_error_exhausts_its_ladder() {
        let mut spec = cudnn_spec();
        spec.dependencies.push(
            DependencyEntry::parse("python=3.11", DependencySource::Native).unwrap(),
        );
        let mut machine = RepairStateMachine::new(spec, 10);
        let mut history = RepairHistory::new();

        let raw = "the very same mystery every time";
        for _ in 0..2 {
            let attempt = machine.begin_attempt().unwrap();
            let report = ErrorReport {
                raw: raw.to_string(),
                kind: ErrorKind::Unknown,
                package: None,
                attempt,
            };
            let entry = machine.absorb_failure(report, None, &history);
            assert_eq!(entry.outcome, AttemptOutcome::Succeeded);
            history.push(entry);
        }

        let attempt = machine.begin_attempt().unwrap();
        let report = ErrorReport {
            raw: raw.to_string(),
            kind: ErrorKind::Unknown,
            package: None,
            attempt,
        };
        let entry = machine.absorb_failure(report, None, &history);
        assert_eq!(entry.outcome, AttemptOutcome::Failed);
        assert_eq!(machine.state(), RepairState::FailedNonRetryable);
    }

    #[test]
    fn test_escalation_table_override() {
        let table = EscalationTable::default().with_ladder(
            ErrorKind::PackageNotFound,
            vec![StrategyId::RemoveDependency],
        );
        let mut machine = RepairStateMachine::new(cudnn_spec(), 10).with_table(table);
        let history = RepairHistory::new();

        let attempt = machine.begin_attempt().unwrap();
        let entry = machine.absorb_failure(cudnn_report(attempt), None, &history);
        assert_eq!(entry.strategy, Some(StrategyId::RemoveDependency));
        assert!(machine.spec().find_dependency("cudnn").is_none());
    }
}
