//! envfix - conda environment generator and repair engine CLI
//!
//! ## Commands
//!
//! - `generate`: analyze a project, write its environment.yml and create
//!   the environment with automatic repair on failure
//! - `repair`: run the repair loop against an existing environment.yml
//! - `resolve-root`: show which subdirectory would be analyzed

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use conda_env_manager::CondaExecutor;
use envfix_core::{
    manifest, resolve_compat, write_repair_artifact, CompatRuleSet, EnvironmentSpec, FixProposer,
    NullProposer, RepairOutcome, RepairReport, RetryController, RootResolver, RuleBasedProposer,
    DEFAULT_MAX_DEPTH,
};

mod collect;
mod openai;

use collect::DependencyCollector;
use openai::OpenAiProposer;

const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Parser)]
#[command(name = "envfix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Conda environment generator with automatic repair", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a project, generate environment.yml and create the environment
    Generate {
        /// Source directory to analyze
        source: PathBuf,

        /// Output environment.yml path
        #[arg(short, long, default_value = "./environment.yml")]
        output: PathBuf,

        /// Environment name (default: project directory name)
        #[arg(short = 'n', long)]
        env_name: Option<String>,

        /// Only generate the yml file, skip environment creation
        #[arg(long)]
        no_create: bool,

        /// Maximum creation attempts
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,

        /// Never call the model service; repair with rules only
        #[arg(long)]
        offline: bool,

        /// Maximum directory depth for project root resolution
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: u32,

        /// Directory for repair run artifacts
        #[arg(long, default_value = ".envfix/runs")]
        artifacts_dir: PathBuf,
    },

    /// Run the repair loop against an existing environment.yml
    Repair {
        /// Path to the environment.yml to repair
        manifest: PathBuf,

        /// Maximum creation attempts
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,

        /// Never call the model service; repair with rules only
        #[arg(long)]
        offline: bool,

        /// Directory for repair run artifacts
        #[arg(long, default_value = ".envfix/runs")]
        artifacts_dir: PathBuf,
    },

    /// Show which subdirectory of a repository would be analyzed
    ResolveRoot {
        /// Repository path
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Maximum directory depth to search
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    envfix_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Generate {
            source,
            output,
            env_name,
            no_create,
            max_retries,
            offline,
            max_depth,
            artifacts_dir,
        } => {
            cmd_generate(
                &source,
                &output,
                env_name.as_deref(),
                no_create,
                max_retries,
                offline,
                max_depth,
                &artifacts_dir,
            )
            .await
        }
        Commands::Repair {
            manifest,
            max_retries,
            offline,
            artifacts_dir,
        } => cmd_repair(&manifest, max_retries, offline, &artifacts_dir).await,
        Commands::ResolveRoot { path, max_depth } => cmd_resolve_root(&path, max_depth),
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_generate(
    source: &Path,
    output: &Path,
    env_name: Option<&str>,
    no_create: bool,
    max_retries: u32,
    offline: bool,
    max_depth: u32,
    artifacts_dir: &Path,
) -> Result<()> {
    let root = RootResolver::new()
        .with_max_depth(max_depth)
        .resolve(source)
        .context("failed to resolve project root")?;
    println!("Project root: {}", root.display());

    let mut collector = DependencyCollector::new();
    collector.scan(&root)?;
    println!(
        "Scanned {} files, CUDA required: {}",
        collector.files_processed(),
        collector.cuda_detected()
    );

    let project_name = env_name
        .map(str::to_string)
        .or_else(|| root.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "env".to_string());

    let spec = collector.into_spec(&project_name);
    let spec = resolve_compat(&CompatRuleSet::standard(), &spec);
    spec.validate().context("generated spec is invalid")?;

    save_manifest(&spec, output)?;
    println!("Wrote {}", output.display());

    if no_create {
        println!("Skipping environment creation (--no-create)");
        println!("Create it later with: conda env create -f {}", output.display());
        return Ok(());
    }

    let report = run_repair_loop(spec, max_retries, offline, artifacts_dir).await?;
    save_manifest(&report.spec, output)?;
    finish(&report, output)
}

async fn cmd_repair(
    manifest_path: &Path,
    max_retries: u32,
    offline: bool,
    artifacts_dir: &Path,
) -> Result<()> {
    let text = std::fs::read_to_string(manifest_path)
        .with_context(|| format!("reading {}", manifest_path.display()))?;
    let spec = manifest::parse(&text).context("failed to parse manifest")?;

    let report = run_repair_loop(spec, max_retries, offline, artifacts_dir).await?;
    save_manifest(&report.spec, manifest_path)?;
    finish(&report, manifest_path)
}

fn cmd_resolve_root(path: &Path, max_depth: u32) -> Result<()> {
    let root = RootResolver::new()
        .with_max_depth(max_depth)
        .resolve(path)
        .context("failed to resolve project root")?;
    println!("{}", root.display());
    Ok(())
}

/// Drive the bounded repair loop and persist the run artifact.
async fn run_repair_loop(
    spec: EnvironmentSpec,
    max_retries: u32,
    offline: bool,
    artifacts_dir: &Path,
) -> Result<RepairReport> {
    let executor = CondaExecutor::new();
    if !executor.is_available().await {
        bail!("conda is not installed or not in PATH");
    }

    // A stale environment with the same name would make `conda env create`
    // fail before the solver even runs.
    if executor.environment_exists(&spec.name).await? {
        info!(name = %spec.name, "environment already exists, removing");
        executor.remove_environment(&spec.name).await?;
    }

    let proposer: Box<dyn FixProposer> = if offline {
        Box::new(NullProposer)
    } else if let Some(model) = OpenAiProposer::from_env() {
        Box::new(model)
    } else {
        info!("OPENAI_API_KEY not set, repairing with rules only");
        Box::new(RuleBasedProposer::new())
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    let _span = envfix_core::RepairSpan::enter(&run_id);
    println!(
        "Creating environment '{}' (up to {} attempts, run {})",
        spec.name, max_retries, run_id
    );

    let controller = RetryController::new(max_retries);
    let report = controller
        .run(&run_id, spec, &executor, proposer.as_ref())
        .await;

    let artifact = write_repair_artifact(&report, artifacts_dir)
        .context("failed to write repair artifact")?;
    println!("Repair artifact: {}", artifact.display());

    Ok(report)
}

fn finish(report: &RepairReport, manifest_path: &Path) -> Result<()> {
    match report.outcome {
        RepairOutcome::Succeeded => {
            println!(
                "Environment '{}' created after {} attempt(s)",
                report.spec.name, report.attempts_used
            );
            println!("Activate it with: conda activate {}", report.spec.name);
            Ok(())
        }
        RepairOutcome::Exhausted => {
            print_history(report);
            bail!(
                "gave up after {} attempts; last manifest saved at {}",
                report.attempts_used,
                manifest_path.display()
            )
        }
        RepairOutcome::FailedNonRetryable => {
            print_history(report);
            bail!(
                "the same failure kept recurring after every applicable fix; \
                 manual intervention required ({})",
                manifest_path.display()
            )
        }
    }
}

fn print_history(report: &RepairReport) {
    for entry in report.history.entries() {
        let strategy = entry
            .strategy
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(|| "-".to_string());
        let snippet: String = entry.report.raw.chars().take(120).collect();
        println!(
            "  attempt {}: {:?} [{}] {}",
            entry.attempt, entry.report.kind, strategy, snippet
        );
    }
}

fn save_manifest(spec: &EnvironmentSpec, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, manifest::render(spec))
        .with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_save_manifest_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("environment.yml");
        save_manifest(&EnvironmentSpec::new("demo"), &path).expect("save");
        assert!(path.exists());
    }
}
