//! Cross-package compatibility rules applied to a spec before creation.
//!
//! Evaluates a [`CompatRuleSet`] against an [`EnvironmentSpec`] to produce a
//! corrected spec. [`resolve_compat`] is pure and idempotent: re-applying it
//! to its own output yields the same result, because no rule re-triggers on
//! the state it establishes.

use serde::{Deserialize, Serialize};

use crate::domain::{
    major_minor, ConstraintOp, DependencyEntry, DependencySource, EnvironmentSpec,
    VersionConstraint,
};

const DEFAULT_CUDA_VERSION: &str = "11.8";
const NUMPY_FOR_OLD_TENSORFLOW: &str = "1.23.5";
const NUMPY_FOR_NEW_TENSORFLOW: &str = "1.24.0";

/// A single deterministic compatibility rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompatRule {
    /// Pin numpy to a release compatible with the detected TensorFlow major
    /// version: `<2.14` needs numpy `==1.23.5` (1.24 removed `np.object`),
    /// `>=2.14` gets `==1.24.0`.
    NumpyTensorflowPin,
    /// When the GPU signal is set and no `cudatoolkit` entry exists, insert
    /// one (pinned to the spec's CUDA hint) and the `nvidia` channel.
    CudaToolkitForGpu,
    /// When the GPU signal is set with a cuDNN version hint and no `cudnn`
    /// entry exists, insert one.
    CudnnForGpu,
}

/// Ordered set of compatibility rules; order is application order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompatRuleSet {
    pub rules: Vec<CompatRule>,
}

impl CompatRuleSet {
    /// Standard rule set, in declared order.
    pub fn standard() -> Self {
        Self {
            rules: vec![
                CompatRule::NumpyTensorflowPin,
                CompatRule::CudaToolkitForGpu,
                CompatRule::CudnnForGpu,
            ],
        }
    }

    /// Add a rule to this set (builder pattern).
    pub fn with_rule(mut self, rule: CompatRule) -> Self {
        self.rules.push(rule);
        self
    }
}

impl Default for CompatRuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

/// Apply every rule in order, returning the corrected spec.
pub fn resolve_compat(rule_set: &CompatRuleSet, spec: &EnvironmentSpec) -> EnvironmentSpec {
    let mut out = spec.clone();
    for rule in &rule_set.rules {
        apply_rule(rule, &mut out);
    }
    out
}

fn apply_rule(rule: &CompatRule, spec: &mut EnvironmentSpec) {
    match rule {
        CompatRule::NumpyTensorflowPin => {
            let Some(tf_version) = spec
                .find_dependency("tensorflow")
                .and_then(|d| d.constraint.as_ref())
                .filter(|c| c.op == ConstraintOp::Exact)
                .map(|c| c.version.clone())
            else {
                return;
            };
            let Some(version) = major_minor(&tf_version) else {
                return;
            };

            let target = if version < (2, 14) {
                NUMPY_FOR_OLD_TENSORFLOW
            } else {
                NUMPY_FOR_NEW_TENSORFLOW
            };

            match spec.find_dependency_mut("numpy") {
                Some(numpy) => {
                    numpy.constraint = Some(VersionConstraint::exact(target));
                }
                None => {
                    spec.dependencies.push(DependencyEntry::pinned(
                        "numpy",
                        target,
                        DependencySource::Native,
                    ));
                }
            }
        }
        CompatRule::CudaToolkitForGpu => {
            if !spec.gpu_required || spec.find_dependency("cudatoolkit").is_some() {
                return;
            }
            let cuda = spec
                .cuda_version
                .clone()
                .unwrap_or_else(|| DEFAULT_CUDA_VERSION.to_string());
            spec.dependencies.push(DependencyEntry::pinned(
                "cudatoolkit",
                cuda,
                DependencySource::Native,
            ));
            spec.insert_channel_front("nvidia");
        }
        CompatRule::CudnnForGpu => {
            if !spec.gpu_required || spec.find_dependency("cudnn").is_some() {
                return;
            }
            let Some(cudnn) = spec.cudnn_version.clone() else {
                return;
            };
            spec.dependencies.push(DependencyEntry::pinned(
                "cudnn",
                cudnn,
                DependencySource::Native,
            ));
        }
    }
}
