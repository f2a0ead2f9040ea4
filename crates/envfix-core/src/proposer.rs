//! Fix proposers: the substitutable capability that suggests candidate
//! repaired specs.
//!
//! Two implementations ship with the workspace: [`RuleBasedProposer`] here
//! (deterministic, no external calls) and the model-backed proposer in the
//! CLI crate. The state machine validates every candidate regardless of its
//! origin, so the core stays testable without any live service.

use async_trait::async_trait;

use crate::domain::{EnvironmentSpec, ErrorReport, RepairHistory};
use crate::repair::{EscalationTable, FixProposal};
use crate::strategy;

/// External collaborator that proposes a candidate repaired spec.
#[async_trait]
pub trait FixProposer: Send + Sync {
    /// Propose a fix for `report`, or `None` when no suggestion is
    /// available. The proposal is advisory; the state machine may reject it.
    async fn propose(
        &self,
        spec: &EnvironmentSpec,
        report: &ErrorReport,
        history: &RepairHistory,
    ) -> Option<FixProposal>;
}

/// Deterministic proposer that walks the escalation ladder for the failure
/// kind and returns the first strategy that is both applicable and not a
/// repeat of the previous fix.
#[derive(Debug, Default)]
pub struct RuleBasedProposer {
    table: EscalationTable,
}

impl RuleBasedProposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(table: EscalationTable) -> Self {
        Self { table }
    }
}

#[async_trait]
impl FixProposer for RuleBasedProposer {
    async fn propose(
        &self,
        spec: &EnvironmentSpec,
        report: &ErrorReport,
        history: &RepairHistory,
    ) -> Option<FixProposal> {
        for &candidate in self.table.ladder(report.kind) {
            if history.repeats_last(candidate, report.kind, report.package.as_deref()) {
                continue;
            }
            if let Some(fixed) = strategy::apply(spec, report, candidate) {
                return Some(FixProposal {
                    strategy: candidate,
                    spec: fixed,
                });
            }
        }
        None
    }
}

/// Proposer that never has a suggestion; the machine falls back to its own
/// ladder. Useful for tests and for running the loop fully offline.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProposer;

#[async_trait]
impl FixProposer for NullProposer {
    async fn propose(
        &self,
        _spec: &EnvironmentSpec,
        _report: &ErrorReport,
        _history: &RepairHistory,
    ) -> Option<FixProposal> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DependencyEntry, DependencySource, ErrorKind, StrategyId};

    fn cudnn_spec() -> EnvironmentSpec {
        let mut spec = EnvironmentSpec::new("demo");
        spec.dependencies.push(
            DependencyEntry::parse("cudnn=8.6", DependencySource::Native).unwrap(),
        );
        spec
    }

    fn cudnn_report() -> ErrorReport {
        ErrorReport {
            raw: "package not found: cudnn=8.6".to_string(),
            kind: ErrorKind::PackageNotFound,
            package: Some("cudnn".to_string()),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_rule_based_proposer_picks_first_applicable() {
        let proposer = RuleBasedProposer::new();
        let history = RepairHistory::new();

        let proposal = proposer
            .propose(&cudnn_spec(), &cudnn_report(), &history)
            .await
            .expect("proposal");
        assert_eq!(proposal.strategy, StrategyId::AddVendorChannel);
        assert_eq!(proposal.spec.channels[0], "nvidia");
    }

    #[tokio::test]
    async fn test_rule_based_proposer_skips_exhausted_strategies() {
        let proposer = RuleBasedProposer::new();
        let history = RepairHistory::new();

        // Channel already present: the first ladder step is inapplicable.
        let mut spec = cudnn_spec();
        spec.insert_channel_front("nvidia");

        let proposal = proposer
            .propose(&spec, &cudnn_report(), &history)
            .await
            .expect("proposal");
        assert_eq!(proposal.strategy, StrategyId::RelaxToLowerBound);
    }

    #[tokio::test]
    async fn test_null_proposer_never_suggests() {
        let history = RepairHistory::new();
        assert!(NullProposer
            .propose(&cudnn_spec(), &cudnn_report(), &history)
            .await
            .is_none());
    }
}
