//! Project-root resolution for multi-project repositories.
//!
//! Scans a directory tree for project markers and picks the directory most
//! likely to be the real analysis target. Scoring is file-presence based:
//! manifests and environment files weigh more than a bare dependency list.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::{EnvfixError, Result};

/// Manifest-grade markers. Each one found directly in a directory adds 10.
const STRONG_MARKERS: &[&str] = &[
    "setup.py",
    "pyproject.toml",
    "environment.yml",
    "environment.yaml",
    "conda.yaml",
];

/// A plain dependency list adds 5.
const WEAK_MARKERS: &[&str] = &["requirements.txt"];

/// Directory names never descended into.
const DEFAULT_IGNORES: &[&str] = &[
    ".git",
    ".idea",
    ".vscode",
    "__pycache__",
    "node_modules",
    "venv",
    "env",
    ".env",
    "dist",
    "build",
];

pub const DEFAULT_MAX_DEPTH: u32 = 3;

/// A visited directory and its marker score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootCandidate {
    pub path: PathBuf,
    pub score: u32,
    pub depth: u32,
}

/// Chooses the true project root inside a repository tree.
#[derive(Debug, Clone)]
pub struct RootResolver {
    max_depth: u32,
    ignores: BTreeSet<String>,
}

impl Default for RootResolver {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            ignores: DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RootResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_ignored(mut self, name: impl Into<String>) -> Self {
        self.ignores.insert(name.into());
        self
    }

    /// Pick the directory with the highest marker score under `root`.
    ///
    /// Ties go to the shallower directory, then to the lexicographically
    /// smaller path; the root itself wins when nothing scores higher.
    /// Deterministic for a fixed tree snapshot.
    pub fn resolve(&self, root: &Path) -> Result<PathBuf> {
        if !root.is_dir() {
            return Err(EnvfixError::RootNotFound(root.to_path_buf()));
        }

        let mut candidates = Vec::new();
        self.walk(root, 0, &mut candidates)?;

        let best = candidates
            .into_iter()
            .max_by(|a, b| {
                a.score
                    .cmp(&b.score)
                    .then_with(|| b.depth.cmp(&a.depth))
                    .then_with(|| b.path.cmp(&a.path))
            })
            .map(|c| {
                debug!(path = %c.path.display(), score = c.score, "resolved project root");
                c.path
            })
            .unwrap_or_else(|| root.to_path_buf());

        Ok(best)
    }

    fn walk(&self, dir: &Path, depth: u32, out: &mut Vec<RootCandidate>) -> Result<()> {
        out.push(RootCandidate {
            path: dir.to_path_buf(),
            score: score_dir(dir),
            depth,
        });

        if depth >= self.max_depth {
            return Ok(());
        }

        // Sorted traversal keeps candidate order stable across platforms.
        let mut children: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        children.sort();

        for child in children {
            let name = child
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if self.ignores.contains(&name) || name.starts_with('.') {
                continue;
            }
            self.walk(&child, depth + 1, out)?;
        }
        Ok(())
    }
}

fn score_dir(dir: &Path) -> u32 {
    let strong = STRONG_MARKERS
        .iter()
        .filter(|marker| dir.join(marker).is_file())
        .count() as u32;
    let weak = WEAK_MARKERS
        .iter()
        .filter(|marker| dir.join(marker).is_file())
        .count() as u32;
    strong * 10 + weak * 5
}
