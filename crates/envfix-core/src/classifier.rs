//! Pattern-based classification of raw environment-creation failures.
//!
//! [`classify`] is a pure function of the failure text: identical input
//! always yields an identical report (the attempt index is supplied by the
//! caller, not derived from the text).

use regex::Regex;

use crate::domain::{ErrorKind, ErrorReport};

/// Classify raw failure text into a structured [`ErrorReport`].
///
/// Patterns are checked in a fixed order; the first match wins:
/// package-not-found, platform, unsatisfiable, conflict, then unknown.
pub fn classify(raw: &str, attempt: u32) -> ErrorReport {
    let lowered = raw.to_lowercase();

    let (kind, package) = if is_package_not_found(&lowered) {
        (ErrorKind::PackageNotFound, extract_package(raw))
    } else if is_platform_incompatible(&lowered) {
        (ErrorKind::PlatformIncompatible, extract_package(raw))
    } else if is_unsatisfiable(&lowered) {
        (ErrorKind::UnsatisfiableDependencies, None)
    } else if is_version_conflict(&lowered) {
        (ErrorKind::VersionConflict, extract_package(raw))
    } else {
        (ErrorKind::Unknown, None)
    };

    ErrorReport {
        raw: raw.to_string(),
        kind,
        package,
        attempt,
    }
}

fn is_package_not_found(lowered: &str) -> bool {
    lowered.contains("packagesnotfounderror")
        || lowered.contains("package not found")
        || lowered.contains("packages are missing from the current channels")
        || lowered.contains("nothing provides")
        || lowered.contains("no matching distribution found")
        || lowered.contains("could not find a version that satisfies")
}

fn is_platform_incompatible(lowered: &str) -> bool {
    lowered.contains("not available for the current platform")
        || lowered.contains("unsupported platform")
        || lowered.contains("unsupported architecture")
        || lowered.contains("is not supported on this platform")
}

fn is_unsatisfiable(lowered: &str) -> bool {
    lowered.contains("unsatisfiableerror")
        || lowered.contains("could not solve")
        || lowered.contains("solving environment: failed")
        || lowered.contains("no solution")
}

fn is_version_conflict(lowered: &str) -> bool {
    lowered.contains("version conflict")
        || lowered.contains("conflicting dependencies")
        || lowered.contains("found conflicts")
        || lowered.contains("is incompatible with")
}

/// Pull the offending package token out of the failure text.
///
/// Tries the explicit `package not found: name=ver` form, then conda's
/// bulleted `- name=ver` listing, then pip's `for name==ver` suffix, then
/// the first `name<op>version` token anywhere. The version suffix is always
/// stripped; only the package name is reported.
fn extract_package(raw: &str) -> Option<String> {
    let patterns = [
        r"(?i)package not found:\s*([A-Za-z0-9_.-]+(?:[=<>][^\s]*)?)",
        r"(?i)nothing provides\s+(?:requested\s+)?([A-Za-z0-9_.-]+(?:[=<>][^\s]*)?)",
        r"(?m)^\s*-\s*([A-Za-z0-9_.-]+[=<>][^\s]*)\s*$",
        r"(?i)(?:distribution found|version that satisfies[^)]*)\s+for\s+([A-Za-z0-9_.-]+(?:[=<>][^\s]*)?)",
        r"([A-Za-z0-9_.-]+)[=<>]{1,2}[0-9][^\s,;']*",
    ];

    for pattern in patterns {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(caps) = re.captures(raw) {
                if let Some(token) = caps.get(1) {
                    let name = strip_constraint(token.as_str());
                    if !name.is_empty() {
                        return Some(name);
                    }
                }
            }
        }
    }
    None
}

fn strip_constraint(token: &str) -> String {
    token
        .split(['=', '<', '>'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}
