//! Rendering and parsing of the `environment.yml` manifest.
//!
//! The manifest is an ordered document: name, channels, native dependencies,
//! then the nested pip block. Order is fixed so consecutive repair attempts
//! produce stable diffs. Parsing is deliberately line-based and strict — the
//! subset of YAML the package manager actually consumes — rather than a full
//! YAML round-trip that would reorder keys.

use crate::domain::{DependencyEntry, DependencySource, EnvfixError, EnvironmentSpec, Result};

/// Render `spec` to manifest text.
///
/// The pip block is emitted only when pip dependencies are present, and is
/// always preceded by the `pip` package itself.
pub fn render(spec: &EnvironmentSpec) -> String {
    let mut out = String::new();
    out.push_str(&format!("name: {}\n", spec.name));

    out.push_str("channels:\n");
    for channel in &spec.channels {
        out.push_str(&format!("  - {channel}\n"));
    }

    out.push_str("dependencies:\n");
    for dep in &spec.dependencies {
        out.push_str(&format!("  - {}\n", dep.render()));
    }
    if !spec.pip_dependencies.is_empty() {
        if !spec.dependencies.iter().any(|d| d.name == "pip") {
            out.push_str("  - pip\n");
        }
        out.push_str("  - pip:\n");
        for dep in &spec.pip_dependencies {
            out.push_str(&format!("      - {}\n", dep.render()));
        }
    }

    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Channels,
    Dependencies,
    PipDependencies,
}

/// Parse manifest text back into an [`EnvironmentSpec`].
///
/// Accepts exactly the shape [`render`] produces plus whitespace and `#`
/// comment lines. Version hints (`gpu_required`, `cuda_version`, ...) are
/// not part of the document and come back unset.
pub fn parse(text: &str) -> Result<EnvironmentSpec> {
    let mut name: Option<String> = None;
    let mut channels: Vec<String> = Vec::new();
    let mut dependencies: Vec<DependencyEntry> = Vec::new();
    let mut pip_dependencies: Vec<DependencyEntry> = Vec::new();
    let mut section = Section::Preamble;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_end();
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Some(value) = line.strip_prefix("name:") {
            let value = value.trim();
            if value.is_empty() {
                return parse_err(line_no, "empty name");
            }
            name = Some(value.to_string());
            section = Section::Preamble;
            continue;
        }
        if line == "channels:" {
            section = Section::Channels;
            continue;
        }
        if line == "dependencies:" {
            section = Section::Dependencies;
            continue;
        }

        let Some(item) = trimmed.strip_prefix("- ") else {
            return parse_err(line_no, format!("unrecognized line '{trimmed}'"));
        };
        let item = item.trim();

        match section {
            Section::Preamble => {
                return parse_err(line_no, "list item before any section header");
            }
            Section::Channels => channels.push(item.to_string()),
            Section::Dependencies => {
                if item == "pip:" {
                    section = Section::PipDependencies;
                } else if item != "pip" {
                    let dep = DependencyEntry::parse(item, DependencySource::Native)
                        .map_err(|e| manifest_err(line_no, e))?;
                    dependencies.push(dep);
                }
            }
            Section::PipDependencies => {
                // A shallow-indented item ends the pip block.
                if !raw_line.starts_with("      ") {
                    section = Section::Dependencies;
                    if item == "pip:" {
                        section = Section::PipDependencies;
                    } else if item != "pip" {
                        let dep = DependencyEntry::parse(item, DependencySource::Native)
                            .map_err(|e| manifest_err(line_no, e))?;
                        dependencies.push(dep);
                    }
                    continue;
                }
                let dep = DependencyEntry::parse(item, DependencySource::Pip)
                    .map_err(|e| manifest_err(line_no, e))?;
                pip_dependencies.push(dep);
            }
        }
    }

    let Some(name) = name else {
        return parse_err(0, "missing name field");
    };

    let spec = EnvironmentSpec {
        name,
        channels,
        dependencies,
        pip_dependencies,
        gpu_required: false,
        cuda_version: None,
        cudnn_version: None,
        python_version: None,
    };
    spec.validate()?;
    Ok(spec)
}

fn parse_err<T>(line: usize, reason: impl Into<String>) -> Result<T> {
    Err(EnvfixError::ManifestParse {
        line,
        reason: reason.into(),
    })
}

fn manifest_err(line: usize, source: EnvfixError) -> EnvfixError {
    EnvfixError::ManifestParse {
        line,
        reason: source.to_string(),
    }
}
