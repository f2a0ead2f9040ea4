//! Repair strategies: pure transforms from a spec and a failure report to a
//! candidate spec.
//!
//! Every strategy either produces a changed spec or reports itself as not
//! applicable (`None`), letting the state machine escalate down the ladder.

use crate::domain::{
    ConstraintOp, DependencySource, EnvironmentSpec, ErrorReport, StrategyId, VersionConstraint,
};

const STABLE_PYTHON: &str = "3.10";

/// Apply `strategy` to `spec` in response to `report`.
///
/// Returns `None` when the strategy is not applicable (offending package
/// absent, nothing to relax, channel already present, ...). Never mutates
/// the input.
pub fn apply(
    spec: &EnvironmentSpec,
    report: &ErrorReport,
    strategy: StrategyId,
) -> Option<EnvironmentSpec> {
    match strategy {
        StrategyId::AddVendorChannel => add_vendor_channel(spec, report),
        StrategyId::RelaxToLowerBound => relax_to_lower_bound(spec, report),
        StrategyId::DropConstraint => drop_constraint(spec, report),
        StrategyId::RemoveDependency => remove_dependency(spec, report),
        StrategyId::MoveToPip => move_to_pip(spec, report),
        StrategyId::RelaxAllConstraints => relax_all_constraints(spec),
        StrategyId::PinInterpreter => pin_interpreter(spec),
        // Model candidates arrive as complete specs, not as transforms.
        StrategyId::ModelSuggested => None,
    }
}

/// Vendor channel hosting a package family. CUDA-adjacent packages live on
/// `nvidia`, the torch family on `pytorch`, everything else falls back to
/// `conda-forge`.
pub fn vendor_channel_for(package: &str) -> &'static str {
    let p = package.to_lowercase();
    if p.starts_with("cuda")
        || p.starts_with("cudnn")
        || p.starts_with("cudatoolkit")
        || p.starts_with("nccl")
        || p.starts_with("tensorrt")
    {
        "nvidia"
    } else if p.starts_with("torch") || p.starts_with("pytorch") {
        "pytorch"
    } else {
        "conda-forge"
    }
}

fn offending<'a>(spec: &EnvironmentSpec, report: &'a ErrorReport) -> Option<&'a str> {
    let name = report.package.as_deref()?;
    spec.find_dependency(name)?;
    Some(name)
}

fn add_vendor_channel(spec: &EnvironmentSpec, report: &ErrorReport) -> Option<EnvironmentSpec> {
    let package = report.package.as_deref()?;
    let channel = vendor_channel_for(package);
    if spec.has_channel(channel) {
        return None;
    }
    let mut out = spec.clone();
    out.insert_channel_front(channel);
    Some(out)
}

fn relax_to_lower_bound(spec: &EnvironmentSpec, report: &ErrorReport) -> Option<EnvironmentSpec> {
    let name = offending(spec, report)?;
    let mut out = spec.clone();
    let dep = out.find_dependency_mut(name)?;
    let constraint = dep.constraint.as_ref()?;
    if constraint.op != ConstraintOp::Exact {
        return None;
    }
    let floor = major_floor(&constraint.version);
    dep.constraint = Some(VersionConstraint::at_least(floor));
    Some(out)
}

fn drop_constraint(spec: &EnvironmentSpec, report: &ErrorReport) -> Option<EnvironmentSpec> {
    let name = offending(spec, report)?;
    let mut out = spec.clone();
    let dep = out.find_dependency_mut(name)?;
    dep.constraint.take()?;
    Some(out)
}

fn remove_dependency(spec: &EnvironmentSpec, report: &ErrorReport) -> Option<EnvironmentSpec> {
    let name = offending(spec, report)?;
    let mut out = spec.clone();
    out.remove_dependency(name)?;
    Some(out)
}

fn move_to_pip(spec: &EnvironmentSpec, report: &ErrorReport) -> Option<EnvironmentSpec> {
    let name = offending(spec, report)?;
    let in_native = spec.dependencies.iter().any(|d| d.name == name);
    if !in_native {
        return None;
    }
    let mut out = spec.clone();
    let mut dep = out.remove_dependency(name)?;
    dep.source = DependencySource::Pip;
    out.pip_dependencies.push(dep);
    Some(out)
}

fn relax_all_constraints(spec: &EnvironmentSpec) -> Option<EnvironmentSpec> {
    let mut out = spec.clone();
    let mut changed = false;
    for dep in out
        .dependencies
        .iter_mut()
        .chain(out.pip_dependencies.iter_mut())
    {
        // The interpreter pin is the one constraint worth keeping.
        if dep.name == "python" {
            continue;
        }
        if dep.constraint.take().is_some() {
            changed = true;
        }
    }
    changed.then_some(out)
}

fn pin_interpreter(spec: &EnvironmentSpec) -> Option<EnvironmentSpec> {
    let mut out = spec.clone();
    match out.find_dependency_mut("python") {
        Some(python) => {
            let pinned = VersionConstraint::exact(STABLE_PYTHON);
            if python.constraint.as_ref() == Some(&pinned) {
                return None;
            }
            python.constraint = Some(pinned);
        }
        None => {
            out.dependencies.insert(
                0,
                crate::domain::DependencyEntry::pinned(
                    "python",
                    STABLE_PYTHON,
                    DependencySource::Native,
                ),
            );
        }
    }
    Some(out)
}

/// Floor a version to its major release: "8.6" -> "8.0", "8" -> "8.0".
fn major_floor(version: &str) -> String {
    match version.split('.').next() {
        Some(major) if !major.is_empty() => format!("{major}.0"),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DependencyEntry, ErrorKind};

    fn spec_with(deps: &[&str]) -> EnvironmentSpec {
        let mut spec = EnvironmentSpec::new("demo");
        for raw in deps {
            spec.dependencies
                .push(DependencyEntry::parse(raw, DependencySource::Native).unwrap());
        }
        spec
    }

    fn not_found(package: &str) -> ErrorReport {
        ErrorReport {
            raw: format!("package not found: {package}"),
            kind: ErrorKind::PackageNotFound,
            package: Some(package.to_string()),
            attempt: 1,
        }
    }

    #[test]
    fn test_add_vendor_channel_for_cuda_package() {
        let spec = spec_with(&["cudnn=8.6"]);
        let out = apply(&spec, &not_found("cudnn"), StrategyId::AddVendorChannel).unwrap();

        assert_eq!(out.channels[0], "nvidia");
        // dependency untouched
        assert_eq!(out.find_dependency("cudnn").unwrap().render(), "cudnn=8.6");
    }

    #[test]
    fn test_add_vendor_channel_not_applicable_when_present() {
        let mut spec = spec_with(&["cudnn=8.6"]);
        spec.insert_channel_front("nvidia");
        assert!(apply(&spec, &not_found("cudnn"), StrategyId::AddVendorChannel).is_none());
    }

    #[test]
    fn test_vendor_channel_mapping() {
        assert_eq!(vendor_channel_for("cudnn"), "nvidia");
        assert_eq!(vendor_channel_for("cudatoolkit"), "nvidia");
        assert_eq!(vendor_channel_for("pytorch-lightning"), "pytorch");
        assert_eq!(vendor_channel_for("somelib"), "conda-forge");
    }

    #[test]
    fn test_relax_to_lower_bound_floors_major() {
        let spec = spec_with(&["cudnn=8.6"]);
        let out = apply(&spec, &not_found("cudnn"), StrategyId::RelaxToLowerBound).unwrap();
        assert_eq!(out.find_dependency("cudnn").unwrap().render(), "cudnn>=8.0");
    }

    #[test]
    fn test_relax_not_applicable_to_lower_bound() {
        let spec = spec_with(&["cudnn>=8.0"]);
        assert!(apply(&spec, &not_found("cudnn"), StrategyId::RelaxToLowerBound).is_none());
    }

    #[test]
    fn test_drop_constraint_leaves_bare_name() {
        let spec = spec_with(&["cudnn>=8.0"]);
        let out = apply(&spec, &not_found("cudnn"), StrategyId::DropConstraint).unwrap();
        assert_eq!(out.find_dependency("cudnn").unwrap().render(), "cudnn");
    }

    #[test]
    fn test_remove_dependency() {
        let spec = spec_with(&["cudnn", "numpy=1.24.0"]);
        let out = apply(&spec, &not_found("cudnn"), StrategyId::RemoveDependency).unwrap();
        assert!(out.find_dependency("cudnn").is_none());
        assert!(out.find_dependency("numpy").is_some());
    }

    #[test]
    fn test_strategies_need_offending_package_in_spec() {
        let spec = spec_with(&["numpy=1.24.0"]);
        for strategy in [
            StrategyId::RelaxToLowerBound,
            StrategyId::DropConstraint,
            StrategyId::RemoveDependency,
            StrategyId::MoveToPip,
        ] {
            assert!(apply(&spec, &not_found("cudnn"), strategy).is_none());
        }
    }

    #[test]
    fn test_move_to_pip_keeps_constraint() {
        let spec = spec_with(&["opencv=4.8.0"]);
        let out = apply(&spec, &not_found("opencv"), StrategyId::MoveToPip).unwrap();
        assert!(out.dependencies.is_empty());
        assert_eq!(out.pip_dependencies[0].render(), "opencv==4.8.0");
    }

    #[test]
    fn test_relax_all_keeps_python_pin() {
        let spec = spec_with(&["python=3.11", "numpy=1.24.0", "pandas>=2.0"]);
        let report = ErrorReport {
            raw: "UnsatisfiableError".to_string(),
            kind: ErrorKind::UnsatisfiableDependencies,
            package: None,
            attempt: 1,
        };
        let out = apply(&spec, &report, StrategyId::RelaxAllConstraints).unwrap();
        assert_eq!(out.find_dependency("python").unwrap().render(), "python=3.11");
        assert_eq!(out.find_dependency("numpy").unwrap().render(), "numpy");
        assert_eq!(out.find_dependency("pandas").unwrap().render(), "pandas");

        // nothing left to relax
        assert!(apply(&out, &report, StrategyId::RelaxAllConstraints).is_none());
    }

    #[test]
    fn test_pin_interpreter() {
        let spec = spec_with(&["python=3.11", "numpy"]);
        let report = ErrorReport {
            raw: "gcc failed building wheel".to_string(),
            kind: ErrorKind::Unknown,
            package: None,
            attempt: 1,
        };
        let out = apply(&spec, &report, StrategyId::PinInterpreter).unwrap();
        assert_eq!(out.find_dependency("python").unwrap().render(), "python=3.10");

        // already pinned to the stable version
        assert!(apply(&out, &report, StrategyId::PinInterpreter).is_none());

        // inserted at the front when missing entirely
        let bare = spec_with(&["numpy"]);
        let out = apply(&bare, &report, StrategyId::PinInterpreter).unwrap();
        assert_eq!(out.dependencies[0].render(), "python=3.10");
    }
}
