//! Dependency collection: scans a project tree and derives the initial
//! environment spec without any external calls.
//!
//! Imports are extracted file by file with plain pattern matching, mapped to
//! their package names, and merged with any pinned versions found in
//! `requirements.txt`. GPU usage and interpreter version hints are picked up
//! from the same pass.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info};

use envfix_core::{DependencyEntry, DependencySource, EnvironmentSpec};

/// Import names whose package name differs. Conda names where they diverge
/// from PyPI (`torch` installs as `pytorch`).
const IMPORT_MAP: &[(&str, &str)] = &[
    ("cv2", "opencv"),
    ("PIL", "pillow"),
    ("sklearn", "scikit-learn"),
    ("skimage", "scikit-image"),
    ("yaml", "pyyaml"),
    ("bs4", "beautifulsoup4"),
    ("dotenv", "python-dotenv"),
    ("dateutil", "python-dateutil"),
    ("OpenSSL", "pyopenssl"),
    ("serial", "pyserial"),
    ("usb", "pyusb"),
    ("jwt", "pyjwt"),
    ("magic", "python-magic"),
    ("Crypto", "pycryptodome"),
    ("torch", "pytorch"),
    ("git", "gitpython"),
    ("llama_index", "llama-index"),
    ("websocket", "websocket-client"),
    ("pinecone", "pinecone-client"),
    ("psycopg2", "psycopg2-binary"),
];

/// Standard-library modules that never become dependencies.
const STDLIB: &[&str] = &[
    "abc", "argparse", "array", "asyncio", "base64", "bisect", "builtins", "calendar", "cgi",
    "cmath", "cmd", "codecs", "collections", "concurrent", "configparser", "contextlib", "copy",
    "csv", "ctypes", "dataclasses", "datetime", "decimal", "difflib", "dis", "email", "enum",
    "errno", "fileinput", "fnmatch", "fractions", "functools", "gc", "getopt", "getpass",
    "gettext", "glob", "gzip", "hashlib", "heapq", "html", "http", "importlib", "inspect", "io",
    "ipaddress", "itertools", "json", "keyword", "linecache", "locale", "logging", "math",
    "mimetypes", "multiprocessing", "numbers", "operator", "os", "pathlib", "pdb", "pickle",
    "platform", "pprint", "queue", "random", "re", "secrets", "select", "selectors", "shlex",
    "shutil", "signal", "site", "socket", "sqlite3", "stat", "statistics", "string", "struct",
    "subprocess", "sys", "sysconfig", "tarfile", "tempfile", "textwrap", "threading", "time",
    "timeit", "token", "tokenize", "traceback", "types", "typing", "unittest", "urllib", "uuid",
    "venv", "warnings", "weakref", "xml", "zipfile", "zlib",
];

/// Directory names skipped during the scan.
const SKIP_DIRS: &[&str] = &[
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

const DEFAULT_PYTHON: &str = "3.9";

/// Accumulated analysis of a project tree.
#[derive(Debug, Default)]
pub struct DependencyCollector {
    imports: BTreeSet<String>,
    requirements: BTreeMap<String, String>,
    python_hints: Vec<String>,
    cuda_detected: bool,
    files_processed: usize,
}

impl DependencyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `root` and feed every Python source and requirements file
    /// through the collector.
    pub fn scan(&mut self, root: &Path) -> Result<()> {
        self.scan_dir(root)
            .with_context(|| format!("scanning {}", root.display()))?;
        info!(
            files = self.files_processed,
            packages = self.imports.len(),
            cuda = self.cuda_detected,
            "dependency scan finished"
        );
        Ok(())
    }

    fn scan_dir(&mut self, dir: &Path) -> Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();

        for path in entries {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if path.is_dir() {
                if SKIP_DIRS.contains(&name.as_str()) || name.starts_with('.') {
                    continue;
                }
                self.scan_dir(&path)?;
            } else if name == "requirements.txt" || path.extension().is_some_and(|e| e == "py") {
                let Ok(content) = std::fs::read_to_string(&path) else {
                    continue;
                };
                self.process_file(&name, &content);
            }
        }
        Ok(())
    }

    /// Feed one file's content through the collector.
    pub fn process_file(&mut self, file_name: &str, content: &str) {
        self.files_processed += 1;

        if file_name == "requirements.txt" {
            self.parse_requirements(content);
            return;
        }

        let found = extract_imports(content);
        debug!(file = file_name, imports = found.len(), "processed file");
        self.imports.extend(found);

        if detect_cuda_usage(content) {
            self.cuda_detected = true;
        }
        self.python_hints.extend(detect_python_hints(content));
    }

    fn parse_requirements(&mut self, content: &str) {
        let re = Regex::new(r"^([A-Za-z0-9_-]+)\s*(==|>=|<=|>|<)\s*([0-9][0-9.]*)").ok();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
                continue;
            }
            if let Some(caps) = re.as_ref().and_then(|re| re.captures(line)) {
                let package = caps[1].to_lowercase();
                let constraint = format!("{}{}", &caps[2], &caps[3]);
                self.requirements.insert(package, constraint);
            } else if let Some(name) = line.split([' ', ';']).next() {
                if !name.is_empty() {
                    self.imports.insert(name.to_lowercase());
                }
            }
        }
    }

    pub fn cuda_detected(&self) -> bool {
        self.cuda_detected
    }

    pub fn files_processed(&self) -> usize {
        self.files_processed
    }

    /// Interpreter version: the highest hint seen, or the default.
    pub fn python_version(&self) -> String {
        self.python_hints
            .iter()
            .max()
            .cloned()
            .unwrap_or_else(|| DEFAULT_PYTHON.to_string())
    }

    /// Produce the initial environment spec for the repair pipeline.
    ///
    /// The interpreter goes first, followed by all detected packages in
    /// sorted order, each constrained by `requirements.txt` where a pin was
    /// found. GPU hints are recorded on the spec for the compat rules.
    pub fn into_spec(self, project_name: &str) -> EnvironmentSpec {
        let python_version = self.python_version();
        let mut spec = EnvironmentSpec::new(project_name);
        spec.gpu_required = self.cuda_detected;
        spec.python_version = Some(python_version.clone());

        spec.dependencies.push(DependencyEntry::pinned(
            "python",
            python_version,
            DependencySource::Native,
        ));

        for import in &self.imports {
            let package = map_import_to_package(import);
            if spec.find_dependency(package).is_some() {
                continue;
            }
            let entry = match self.requirements.get(&package.to_lowercase()) {
                Some(constraint) => {
                    DependencyEntry::parse(&format!("{package}{constraint}"), DependencySource::Native)
                        .unwrap_or_else(|_| DependencyEntry::bare(package, DependencySource::Native))
                }
                None => DependencyEntry::bare(package, DependencySource::Native),
            };
            spec.dependencies.push(entry);
        }

        spec
    }
}

fn extract_imports(content: &str) -> BTreeSet<String> {
    let mut imports = BTreeSet::new();
    let re = Regex::new(r"^(?:from\s+([A-Za-z0-9_.]+)\s+import|import\s+(.+))").ok();
    let Some(re) = re else {
        return imports;
    };

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some(caps) = re.captures(line) else {
            continue;
        };
        if let Some(module) = caps.get(1) {
            add_import(&mut imports, module.as_str());
        } else if let Some(list) = caps.get(2) {
            // `import a, b as c` pulls in several modules at once.
            for item in list.as_str().split(',') {
                let module = item.split(" as ").next().unwrap_or("").trim();
                if !module.is_empty() {
                    add_import(&mut imports, module);
                }
            }
        }
    }
    imports
}

fn add_import(imports: &mut BTreeSet<String>, module: &str) {
    let top = module.split('.').next().unwrap_or("");
    if top.is_empty() || top.starts_with('.') || STDLIB.contains(&top) {
        return;
    }
    imports.insert(top.to_string());
}

fn detect_cuda_usage(content: &str) -> bool {
    const PATTERNS: &[&str] = &[
        "torch.cuda",
        ".cuda()",
        "device=\"cuda\"",
        "device='cuda'",
        "tf.config.list_physical_devices",
        "CUDAExecutionProvider",
    ];
    PATTERNS.iter().any(|p| content.contains(p))
}

fn detect_python_hints(content: &str) -> Vec<String> {
    let mut hints = Vec::new();

    // Structural pattern matching needs 3.10.
    let has_match = Regex::new(r"(?m)^\s*match\s+.+:")
        .ok()
        .is_some_and(|re| re.is_match(content));
    let has_case = Regex::new(r"(?m)^\s*case\s+.+:")
        .ok()
        .is_some_and(|re| re.is_match(content));
    if has_match && has_case {
        hints.push("3.10".to_string());
    }

    // Walrus operator and typing.Literal both arrived in 3.8.
    if content.contains(":=") {
        hints.push("3.8".to_string());
    }
    if content.contains("from typing import") && content.contains("Literal") {
        hints.push("3.8".to_string());
    }

    hints
}

/// Map an import name to its installable package name.
pub fn map_import_to_package(import_name: &str) -> &str {
    IMPORT_MAP
        .iter()
        .find(|(import, _)| *import == import_name)
        .map(|(_, package)| *package)
        .unwrap_or(import_name)
}
