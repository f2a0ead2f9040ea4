//! Failure reports, repair strategies and the append-only repair history.

use serde::{Deserialize, Serialize};

use crate::domain::spec::EnvironmentSpec;

/// Classified category of an environment-creation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A named package/version combination is unavailable.
    PackageNotFound,
    /// Two or more constraints are mutually unsatisfiable.
    VersionConflict,
    /// The solver reports no valid combination exists.
    UnsatisfiableDependencies,
    /// A package is unavailable for the current platform/architecture.
    PlatformIncompatible,
    /// Text matched none of the known patterns.
    Unknown,
}

/// Structured failure signal produced by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Raw failure text from the creation collaborator.
    pub raw: String,
    pub kind: ErrorKind,
    /// Offending package, when one could be extracted.
    pub package: Option<String>,
    /// 1-based attempt index at which the failure occurred.
    pub attempt: u32,
}

/// Identifier of a repair strategy applied to a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    /// Add the vendor channel matching the offending package.
    AddVendorChannel,
    /// Relax an exact pin to a lower-bound constraint at the major floor.
    RelaxToLowerBound,
    /// Remove the version constraint, leaving the bare package name.
    DropConstraint,
    /// Remove the dependency entirely.
    RemoveDependency,
    /// Move the dependency from the native list to the pip list.
    MoveToPip,
    /// Strip every constraint except the interpreter pin.
    RelaxAllConstraints,
    /// Pin the interpreter to a known-stable version.
    PinInterpreter,
    /// Candidate produced by the model-backed proposer.
    ModelSuggested,
}

/// Result of a single repair attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// A fix was applied, producing a new spec.
    Succeeded,
    /// No strategy could produce a fix for this failure.
    Failed,
    /// No fix was attempted (terminal state already decided).
    Skipped,
}

/// One entry in the repair timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    /// 1-based creation attempt that triggered this entry.
    pub attempt: u32,
    /// The failure this entry responds to.
    pub report: ErrorReport,
    /// Strategy applied; `None` when the outcome is not `Succeeded`.
    pub strategy: Option<StrategyId>,
    /// Spec in effect after this entry.
    pub spec: EnvironmentSpec,
    pub outcome: AttemptOutcome,
}

/// Append-only record of every repair attempt.
///
/// Invariant: no two consecutive entries apply the same strategy to the same
/// `(ErrorKind, offending package)` pair. The state machine enforces this
/// when selecting fixes; [`RepairHistory::repeats_last`] is the check it uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairHistory {
    entries: Vec<FixAttempt>,
}

impl RepairHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FixAttempt] {
        &self.entries
    }

    pub fn last(&self) -> Option<&FixAttempt> {
        self.entries.last()
    }

    /// Whether applying `strategy` to `(kind, package)` now would repeat the
    /// immediately preceding entry — the loop-prevention check.
    pub fn repeats_last(
        &self,
        strategy: StrategyId,
        kind: ErrorKind,
        package: Option<&str>,
    ) -> bool {
        match self.entries.last() {
            Some(prev) => {
                prev.strategy == Some(strategy)
                    && prev.report.kind == kind
                    && prev.report.package.as_deref() == package
            }
            None => false,
        }
    }

    /// Append an entry. Callers must have validated the no-repeat invariant;
    /// this is checked in debug builds.
    pub fn push(&mut self, entry: FixAttempt) {
        if let Some(strategy) = entry.strategy {
            debug_assert!(
                !self.repeats_last(
                    strategy,
                    entry.report.kind,
                    entry.report.package.as_deref()
                ),
                "consecutive entries repeat strategy {strategy:?} for the same failure"
            );
        }
        self.entries.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(kind: ErrorKind, package: Option<&str>, attempt: u32) -> ErrorReport {
        ErrorReport {
            raw: "boom".to_string(),
            kind,
            package: package.map(str::to_string),
            attempt,
        }
    }

    fn entry(strategy: Option<StrategyId>, kind: ErrorKind, package: Option<&str>) -> FixAttempt {
        FixAttempt {
            attempt: 1,
            report: report(kind, package, 1),
            strategy,
            spec: EnvironmentSpec::new("demo"),
            outcome: AttemptOutcome::Succeeded,
        }
    }

    #[test]
    fn test_repeats_last_detects_repeat() {
        let mut history = RepairHistory::new();
        history.push(entry(
            Some(StrategyId::AddVendorChannel),
            ErrorKind::PackageNotFound,
            Some("cudnn"),
        ));

        assert!(history.repeats_last(
            StrategyId::AddVendorChannel,
            ErrorKind::PackageNotFound,
            Some("cudnn"),
        ));
        assert!(!history.repeats_last(
            StrategyId::RelaxToLowerBound,
            ErrorKind::PackageNotFound,
            Some("cudnn"),
        ));
        assert!(!history.repeats_last(
            StrategyId::AddVendorChannel,
            ErrorKind::PackageNotFound,
            Some("numpy"),
        ));
    }

    #[test]
    fn test_empty_history_never_repeats() {
        let history = RepairHistory::new();
        assert!(!history.repeats_last(
            StrategyId::DropConstraint,
            ErrorKind::Unknown,
            None
        ));
    }

    #[test]
    fn test_history_serde_roundtrip() {
        let mut history = RepairHistory::new();
        history.push(entry(
            Some(StrategyId::PinInterpreter),
            ErrorKind::Unknown,
            None,
        ));

        let json = serde_json::to_string(&history).expect("serialize");
        let back: RepairHistory = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(history, back);
    }
}
