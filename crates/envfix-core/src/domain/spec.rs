//! Environment spec: the structured description of a reproducible package
//! environment (name, channels, dependencies) that the repair loop mutates.

use serde::{Deserialize, Serialize};

use crate::domain::{EnvfixError, Result};

/// Where a dependency is installed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencySource {
    /// Resolved by the package manager's own channels.
    Native,
    /// Installed through pip inside the environment.
    Pip,
}

/// Comparison operator of a version constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOp {
    Exact,
    GreaterEq,
    LessEq,
    Greater,
    Less,
}

impl ConstraintOp {
    /// Render the operator for a given dependency source. Conda spells an
    /// exact pin `name=ver`, pip spells it `name==ver`.
    pub fn render(&self, source: DependencySource) -> &'static str {
        match self {
            ConstraintOp::Exact => match source {
                DependencySource::Native => "=",
                DependencySource::Pip => "==",
            },
            ConstraintOp::GreaterEq => ">=",
            ConstraintOp::LessEq => "<=",
            ConstraintOp::Greater => ">",
            ConstraintOp::Less => "<",
        }
    }
}

/// A version constraint such as `>=8.0` or `==1.23.5`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConstraint {
    pub op: ConstraintOp,
    pub version: String,
}

impl VersionConstraint {
    pub fn exact(version: impl Into<String>) -> Self {
        Self {
            op: ConstraintOp::Exact,
            version: version.into(),
        }
    }

    pub fn at_least(version: impl Into<String>) -> Self {
        Self {
            op: ConstraintOp::GreaterEq,
            version: version.into(),
        }
    }
}

/// One package requirement inside an [`EnvironmentSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub name: String,
    pub constraint: Option<VersionConstraint>,
    pub source: DependencySource,
}

impl DependencyEntry {
    pub fn bare(name: impl Into<String>, source: DependencySource) -> Self {
        Self {
            name: name.into(),
            constraint: None,
            source,
        }
    }

    pub fn pinned(
        name: impl Into<String>,
        version: impl Into<String>,
        source: DependencySource,
    ) -> Self {
        Self {
            name: name.into(),
            constraint: Some(VersionConstraint::exact(version)),
            source,
        }
    }

    /// Parse a requirement string like `cudnn=8.6`, `numpy==1.24.0` or
    /// `requests>=2.31`. Operators are matched longest-first so `>=` is not
    /// misread as `>`.
    pub fn parse(raw: &str, source: DependencySource) -> Result<Self> {
        let raw = raw.trim();
        const OPS: [(&str, ConstraintOp); 6] = [
            ("==", ConstraintOp::Exact),
            (">=", ConstraintOp::GreaterEq),
            ("<=", ConstraintOp::LessEq),
            ("=", ConstraintOp::Exact),
            (">", ConstraintOp::Greater),
            ("<", ConstraintOp::Less),
        ];

        for (sym, op) in OPS {
            if let Some(idx) = raw.find(sym) {
                let name = raw[..idx].trim();
                let version = raw[idx + sym.len()..].trim();
                if name.is_empty() {
                    return Err(EnvfixError::InvalidDependency(format!(
                        "missing package name in '{raw}'"
                    )));
                }
                if version.is_empty() {
                    return Err(EnvfixError::InvalidDependency(format!(
                        "missing version after '{sym}' in '{raw}'"
                    )));
                }
                return Ok(Self {
                    name: name.to_string(),
                    constraint: Some(VersionConstraint {
                        op,
                        version: version.to_string(),
                    }),
                    source,
                });
            }
        }

        if raw.is_empty() {
            return Err(EnvfixError::InvalidDependency(
                "empty dependency string".to_string(),
            ));
        }
        Ok(Self::bare(raw, source))
    }

    /// Render back to the requirement-string form for this entry's source.
    pub fn render(&self) -> String {
        match &self.constraint {
            Some(c) => format!("{}{}{}", self.name, c.op.render(self.source), c.version),
            None => self.name.clone(),
        }
    }
}

/// The structured description of a reproducible package environment.
///
/// Owned exclusively by the repair loop while repairs run; every strategy
/// produces a new value rather than editing shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Environment name. Must match `[a-z0-9_]+` and not start with a digit.
    pub name: String,
    /// Ordered channel list, no duplicates. Order is solver priority.
    pub channels: Vec<String>,
    /// Manager-native dependencies, in declaration order.
    pub dependencies: Vec<DependencyEntry>,
    /// Pip dependencies, in declaration order.
    pub pip_dependencies: Vec<DependencyEntry>,
    /// GPU-usage signal detected upstream; consumed by the compat engine.
    #[serde(default)]
    pub gpu_required: bool,
    /// CUDA toolkit version hint (e.g. "11.8").
    #[serde(default)]
    pub cuda_version: Option<String>,
    /// cuDNN version hint (e.g. "8.6").
    #[serde(default)]
    pub cudnn_version: Option<String>,
    /// Target interpreter version hint (e.g. "3.10").
    #[serde(default)]
    pub python_version: Option<String>,
}

impl EnvironmentSpec {
    /// Create an empty spec with a sanitized name and the default channels.
    pub fn new(name: &str) -> Self {
        Self {
            name: sanitize_env_name(name),
            channels: vec!["conda-forge".to_string(), "defaults".to_string()],
            dependencies: Vec::new(),
            pip_dependencies: Vec::new(),
            gpu_required: false,
            cuda_version: None,
            cudnn_version: None,
            python_version: None,
        }
    }

    /// Check the structural invariants: valid name, unique channels,
    /// non-empty package names.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EnvfixError::InvalidSpec("name is empty".to_string()));
        }
        if self.name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return Err(EnvfixError::InvalidSpec(format!(
                "name '{}' starts with a digit",
                self.name
            )));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(EnvfixError::InvalidSpec(format!(
                "name '{}' contains characters outside [a-z0-9_]",
                self.name
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.as_str()) {
                return Err(EnvfixError::InvalidSpec(format!(
                    "duplicate channel '{channel}'"
                )));
            }
        }

        for dep in self.dependencies.iter().chain(&self.pip_dependencies) {
            if dep.name.trim().is_empty() {
                return Err(EnvfixError::InvalidDependency(
                    "dependency with empty package name".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }

    /// Insert a channel at the front (highest solver priority) if absent.
    /// Returns whether the spec changed.
    pub fn insert_channel_front(&mut self, channel: &str) -> bool {
        if self.has_channel(channel) {
            return false;
        }
        self.channels.insert(0, channel.to_string());
        true
    }

    /// Find a dependency by package name across both lists.
    pub fn find_dependency(&self, name: &str) -> Option<&DependencyEntry> {
        self.dependencies
            .iter()
            .chain(&self.pip_dependencies)
            .find(|d| d.name == name)
    }

    /// Mutable lookup across both lists.
    pub fn find_dependency_mut(&mut self, name: &str) -> Option<&mut DependencyEntry> {
        self.dependencies
            .iter_mut()
            .chain(self.pip_dependencies.iter_mut())
            .find(|d| d.name == name)
    }

    /// Remove a dependency from whichever list holds it. Returns the
    /// removed entry, if any.
    pub fn remove_dependency(&mut self, name: &str) -> Option<DependencyEntry> {
        if let Some(idx) = self.dependencies.iter().position(|d| d.name == name) {
            return Some(self.dependencies.remove(idx));
        }
        if let Some(idx) = self.pip_dependencies.iter().position(|d| d.name == name) {
            return Some(self.pip_dependencies.remove(idx));
        }
        None
    }
}

/// Convert an arbitrary project name to a valid environment name.
///
/// Lowercases, maps spaces/hyphens to underscores, strips everything outside
/// `[a-z0-9_]`, collapses repeated underscores, and prefixes `env_` when the
/// result would start with a digit. Falls back to `env` for empty input.
pub fn sanitize_env_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;

    for c in name.trim().chars() {
        let mapped = match c {
            ' ' | '-' => Some('_'),
            c if c.is_ascii_alphanumeric() => Some(c.to_ascii_lowercase()),
            '_' => Some('_'),
            _ => None,
        };
        if let Some(m) = mapped {
            if m == '_' && last_underscore {
                continue;
            }
            last_underscore = m == '_';
            out.push(m);
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return "env".to_string();
    }
    if trimmed.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return format!("env_{trimmed}");
    }
    trimmed.to_string()
}

/// Parse a `major.minor` version prefix ("2.14.1" -> (2, 14)).
pub fn major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |m| m.parse().ok())?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_env_name() {
        assert_eq!(sanitize_env_name("ML Test Project"), "ml_test_project");
        assert_eq!(sanitize_env_name("My-App@v2.0"), "my_appv20");
        assert_eq!(sanitize_env_name("project#123"), "project123");
        assert_eq!(sanitize_env_name("123abc"), "env_123abc");
        assert_eq!(sanitize_env_name("___"), "env");
        assert_eq!(sanitize_env_name(""), "env");
        assert_eq!(sanitize_env_name("a  -  b"), "a_b");
    }

    #[test]
    fn test_dependency_parse_operators() {
        let d = DependencyEntry::parse("cudnn=8.6", DependencySource::Native).unwrap();
        assert_eq!(d.name, "cudnn");
        assert_eq!(d.constraint, Some(VersionConstraint::exact("8.6")));

        let d = DependencyEntry::parse("numpy==1.24.0", DependencySource::Pip).unwrap();
        assert_eq!(d.constraint, Some(VersionConstraint::exact("1.24.0")));

        let d = DependencyEntry::parse("requests>=2.31", DependencySource::Pip).unwrap();
        assert_eq!(d.constraint, Some(VersionConstraint::at_least("2.31")));

        let d = DependencyEntry::parse("pandas", DependencySource::Native).unwrap();
        assert!(d.constraint.is_none());
    }

    #[test]
    fn test_dependency_parse_rejects_empty() {
        assert!(DependencyEntry::parse("", DependencySource::Native).is_err());
        assert!(DependencyEntry::parse("=1.0", DependencySource::Native).is_err());
        assert!(DependencyEntry::parse("numpy==", DependencySource::Pip).is_err());
    }

    #[test]
    fn test_dependency_render_source_specific_pins() {
        let native = DependencyEntry::pinned("cudnn", "8.6", DependencySource::Native);
        assert_eq!(native.render(), "cudnn=8.6");

        let pip = DependencyEntry::pinned("numpy", "1.24.0", DependencySource::Pip);
        assert_eq!(pip.render(), "numpy==1.24.0");
    }

    #[test]
    fn test_spec_validate_name_invariants() {
        let mut spec = EnvironmentSpec::new("My Project");
        assert_eq!(spec.name, "my_project");
        spec.validate().unwrap();

        spec.name = "9lives".to_string();
        assert!(spec.validate().is_err());

        spec.name = "has space".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_spec_validate_duplicate_channels() {
        let mut spec = EnvironmentSpec::new("demo");
        spec.channels = vec!["conda-forge".to_string(), "conda-forge".to_string()];
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_insert_channel_front_is_idempotent() {
        let mut spec = EnvironmentSpec::new("demo");
        assert!(spec.insert_channel_front("nvidia"));
        assert_eq!(spec.channels[0], "nvidia");
        assert!(!spec.insert_channel_front("nvidia"));
        assert_eq!(
            spec.channels.iter().filter(|c| *c == "nvidia").count(),
            1
        );
    }

    #[test]
    fn test_remove_dependency_searches_both_lists() {
        let mut spec = EnvironmentSpec::new("demo");
        spec.dependencies
            .push(DependencyEntry::bare("numpy", DependencySource::Native));
        spec.pip_dependencies
            .push(DependencyEntry::bare("requests", DependencySource::Pip));

        assert!(spec.remove_dependency("requests").is_some());
        assert!(spec.remove_dependency("requests").is_none());
        assert!(spec.find_dependency("numpy").is_some());
    }

    #[test]
    fn test_major_minor() {
        assert_eq!(major_minor("2.14.1"), Some((2, 14)));
        assert_eq!(major_minor("8"), Some((8, 0)));
        assert_eq!(major_minor("not-a-version"), None);
    }

    #[test]
    fn test_spec_serde_roundtrip() {
        let mut spec = EnvironmentSpec::new("demo");
        spec.gpu_required = true;
        spec.cuda_version = Some("11.8".to_string());
        spec.dependencies
            .push(DependencyEntry::pinned("cudnn", "8.6", DependencySource::Native));

        let json = serde_json::to_string(&spec).expect("serialize");
        let back: EnvironmentSpec = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(spec, back);
    }
}
