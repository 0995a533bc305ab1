//! autograde - batch grading of programming submissions
//!
//! The `autograde` command extracts a CMS submission bundle, runs every
//! submission's tests in an isolated container and writes a gradebook.
//!
//! ## Commands
//!
//! - `autograde <bundle> <destination> <csv>`: the whole pipeline
//! - `extract`: unpack a submission bundle into one directory per submission
//! - `grade`: run the tests of every submission in a container
//! - `bootstrap`: in-container entry point, one bounded test run
//! - `analyze`: turn result artifacts into a gradebook CSV
//! - `summary`: print per-submission feedback

use anyhow::{Context, Result};
use autograde_core::{Analyzer, Extractor, GraderConfig};
use autograde_runner::{
    BootstrapPlan, DockerRuntime, GradingReport, Orchestrator, Pipeline, SubmissionStatus,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "autograde")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract, grade and analyze programming submissions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Grader configuration file (TOML)
    #[arg(long, global = true, env = "AUTOGRADE_CONFIG")]
    config: Option<PathBuf>,

    /// Submission bundle exported from the CMS (zip)
    bundle: Option<PathBuf>,

    /// Directory that receives one folder per submission
    destination: Option<PathBuf>,

    /// Gradebook CSV to write
    csv: Option<PathBuf>,

    /// Replace submission directories that already exist before grading
    /// (`--overwrite` only regrades; the extracted files are kept)
    #[arg(long)]
    reextract: bool,

    #[command(flatten)]
    grade: GradeArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Overrides for the grading stage.
#[derive(Args, Debug, Default, Clone)]
struct GradeArgs {
    /// Directory holding the instructor tests
    #[arg(long, env = "AUTOGRADE_TESTS_DIR")]
    tests: Option<PathBuf>,

    /// Directory holding the grading library
    #[arg(long, env = "AUTOGRADE_LIB_DIR")]
    library: Option<PathBuf>,

    /// Container image to run submissions in
    #[arg(long, env = "AUTOGRADE_IMAGE")]
    image: Option<String>,

    /// Regrade submissions that already have results
    #[arg(long)]
    overwrite: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Unpack a submission bundle
    Extract {
        /// Submission bundle (zip)
        #[arg(short, long)]
        source: PathBuf,

        /// Destination directory
        #[arg(short, long)]
        destination: PathBuf,

        /// File name patterns to keep (repeatable; default: all files)
        #[arg(short = 'l', long = "pattern")]
        patterns: Vec<String>,

        /// Replace submission directories that already exist
        #[arg(long)]
        overwrite: bool,
    },

    /// Run the tests of every submission in a container
    Grade {
        /// Directory with one folder per submission
        destination: PathBuf,

        #[command(flatten)]
        grade: GradeArgs,
    },

    /// Run one bounded test run (inside the container)
    Bootstrap {
        /// Submission root (read-write)
        #[arg(long)]
        submission: PathBuf,

        /// Tests root
        #[arg(long)]
        tests: PathBuf,

        /// Grading library root
        #[arg(long)]
        library: PathBuf,

        /// Test time limit in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Extra seconds before the runner is killed
        #[arg(long)]
        grace: Option<f64>,

        /// Test target handed to the runner
        #[arg(long)]
        target: Option<String>,

        /// Variable that receives the module search path
        #[arg(long)]
        search_path_var: Option<String>,

        /// Result artifact file name
        #[arg(long)]
        results_file: Option<String>,

        /// Log artifact file name
        #[arg(long)]
        log_file: Option<String>,

        /// Run the test runner without verbose output
        #[arg(long)]
        quiet: bool,

        /// Test runner command (after `--`)
        #[arg(last = true)]
        runner: Vec<String>,
    },

    /// Write the gradebook CSV
    Analyze {
        /// Directory with one folder per submission
        destination: PathBuf,

        /// Output CSV path
        #[arg(short, long)]
        csv: PathBuf,
    },

    /// Print per-submission feedback
    Summary {
        /// Directory with one folder per submission
        destination: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    autograde_core::init_tracing(cli.json, level);

    let config = GraderConfig::load(cli.config.as_deref())
        .with_context(|| format!("Failed to load configuration {:?}", cli.config))?;

    match cli.command {
        Some(Commands::Extract {
            source,
            destination,
            patterns,
            overwrite,
        }) => cmd_extract(config, &source, &destination, patterns, overwrite).await,
        Some(Commands::Grade { destination, grade }) => {
            cmd_grade(apply_grade_args(config, &grade)?, &destination).await
        }
        Some(Commands::Bootstrap {
            submission,
            tests,
            library,
            timeout,
            grace,
            target,
            search_path_var,
            results_file,
            log_file,
            quiet,
            runner,
        }) => {
            let mut plan = BootstrapPlan::in_container(&config);
            plan.submission_root = submission;
            plan.tests_root = tests;
            plan.library_root = library;
            if let Some(secs) = timeout {
                plan.timeout = seconds(secs, "--timeout")?;
            }
            if let Some(secs) = grace {
                plan.grace = seconds(secs, "--grace")?;
            }
            if let Some(target) = target {
                plan.test_target = target;
            }
            if let Some(var) = search_path_var {
                plan.search_path_var = var;
            }
            if let Some(name) = results_file {
                plan.artifacts.results_file = name;
            }
            if let Some(name) = log_file {
                plan.artifacts.log_file = name;
            }
            if quiet {
                plan.verbose = false;
            }
            if !runner.is_empty() {
                plan.test_runner = runner;
            }
            cmd_bootstrap(&plan).await
        }
        Some(Commands::Analyze { destination, csv }) => cmd_analyze(&config, &destination, &csv),
        Some(Commands::Summary { destination }) => cmd_summary(&config, &destination),
        None => match (cli.bundle, cli.destination, cli.csv) {
            (Some(bundle), Some(destination), Some(csv)) => {
                let mut config = apply_grade_args(config, &cli.grade)?;
                if cli.reextract {
                    config.extract.overwrite_existing = true;
                }
                cmd_pipeline(config, &bundle, &destination, &csv).await
            }
            _ => anyhow::bail!(
                "Expected <bundle> <destination> <csv> or a subcommand (see --help)"
            ),
        },
    }
}

/// Layer command-line overrides on top of the loaded configuration.
fn apply_grade_args(mut config: GraderConfig, args: &GradeArgs) -> Result<GraderConfig> {
    if let Some(tests) = &args.tests {
        config.grade.tests_dir = tests.clone();
    }
    if let Some(library) = &args.library {
        config.grade.lib_dir = library.clone();
    }
    if let Some(image) = &args.image {
        config.container.image = image.clone();
    }
    if args.overwrite {
        config.grade.overwrite_existing = true;
    }
    config.validate().context("Invalid grading configuration")?;
    Ok(config)
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("Invalid {} value {}", flag, value))
}

fn runtime_for(config: &GraderConfig) -> DockerRuntime {
    DockerRuntime::new(
        config.container.runtime.clone(),
        config.container.extra_args.clone(),
    )
}

async fn cmd_extract(
    mut config: GraderConfig,
    source: &Path,
    destination: &Path,
    patterns: Vec<String>,
    overwrite: bool,
) -> Result<()> {
    if !patterns.is_empty() {
        config.extract.file_patterns = patterns;
    }
    if overwrite {
        config.extract.overwrite_existing = true;
    }
    let overwrite = config.extract.overwrite_existing;
    let extractor =
        Extractor::new(config.extract, &config.artifacts).context("Invalid file pattern")?;
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();
    let report = tokio::task::spawn_blocking(move || {
        extractor.extract_bundle(&source, &destination, overwrite)
    })
    .await
    .context("Extraction task panicked")?
    .context("Failed to extract bundle")?;

    println!("Extracted: {}", report.extracted.len());
    if !report.existing.is_empty() {
        println!("Already present: {}", report.existing.join(", "));
    }
    if !report.empty.is_empty() {
        println!("No matching files: {}", report.empty.join(", "));
    }
    if !report.dropped.is_empty() {
        println!("Refused (grading artifact names): {}", report.dropped.join(", "));
    }
    for failure in &report.failed {
        println!("  ✗ {}: {}", failure.id, failure.reason);
    }
    Ok(())
}

async fn cmd_grade(config: GraderConfig, destination: &Path) -> Result<()> {
    let orchestrator = Orchestrator::new(config.clone(), runtime_for(&config));
    let report = orchestrator
        .grade_all(destination)
        .await
        .context("Grading failed to run")?;
    print_grading(&report);
    Ok(())
}

async fn cmd_bootstrap(plan: &BootstrapPlan) -> Result<()> {
    let outcome = plan.run().await.context("Bootstrap failed")?;
    info!(
        termination = ?outcome.termination,
        complete = outcome.complete,
        "Bootstrap done"
    );
    std::process::exit(outcome.exit_code());
}

fn cmd_analyze(config: &GraderConfig, destination: &Path, csv: &Path) -> Result<()> {
    let report = Analyzer::new(config.artifacts.clone())
        .analyze(destination, csv)
        .context("Failed to write gradebook")?;
    println!(
        "Gradebook: {} ({} rows, {} complete, {} incomplete)",
        csv.display(),
        report.rows,
        report.complete,
        report.incomplete
    );
    Ok(())
}

fn cmd_summary(config: &GraderConfig, destination: &Path) -> Result<()> {
    let text = Analyzer::new(config.artifacts.clone())
        .summarize(destination)
        .context("Failed to summarize results")?;
    print!("{}", text);
    Ok(())
}

async fn cmd_pipeline(
    config: GraderConfig,
    bundle: &Path,
    destination: &Path,
    csv: &Path,
) -> Result<()> {
    let runtime = runtime_for(&config);
    let report = Pipeline::new(config, runtime)
        .run(bundle, destination, csv)
        .await?;

    println!(
        "Extracted {} submissions ({} failed)",
        report.extraction.available(),
        report.extraction.failed.len()
    );
    for dropped in &report.extraction.dropped {
        println!("  ! refused {}", dropped);
    }
    print_grading(&report.grading);
    println!(
        "Gradebook: {} ({} rows, {} complete)",
        csv.display(),
        report.analysis.rows,
        report.analysis.complete
    );
    println!("Duration: {}ms", report.duration_ms);
    Ok(())
}

fn print_grading(report: &GradingReport) {
    println!("Run ID: {}", report.run_id);
    for outcome in &report.outcomes {
        let mark = match outcome.status {
            SubmissionStatus::Graded => "✓",
            SubmissionStatus::Skipped => "-",
            SubmissionStatus::Incomplete | SubmissionStatus::Failed => "✗",
        };
        match &outcome.detail {
            Some(detail) => println!("  {} {} ({}ms): {}", mark, outcome.id, outcome.duration_ms, detail),
            None => println!("  {} {} ({}ms)", mark, outcome.id, outcome.duration_ms),
        }
    }
    println!(
        "Summary: {} graded, {} incomplete, {} failed, {} skipped",
        report.count(SubmissionStatus::Graded),
        report.count(SubmissionStatus::Incomplete),
        report.count(SubmissionStatus::Failed),
        report.count(SubmissionStatus::Skipped)
    );
    if let Ok(json) = serde_json::to_string(report) {
        tracing::debug!(report = %json, "Grading report");
    }
}
