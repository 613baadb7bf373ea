use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use mutant_triage::diff;
use mutant_triage::triage::{
    ObservationLayout, PointRecord, RunSummary, TriageConfig, install_signal_handler,
    load_run_status, read_json, render_run_summary, run_observation,
};

#[derive(Debug, Parser)]
#[command(name = "mutant-triage")]
#[command(about = "Classify surviving mutants by diffing observed program state")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Observe every ill-tested method of the mutation report.
    Observe {
        /// Config file (defaults to ./mutant-triage.toml when present).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Project directory.
        #[arg(long)]
        project: Option<PathBuf>,
        /// Mutation report to read.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Output directory.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Time budget per test runner process, in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Diff two persisted point files and print the report as JSON.
    Diff {
        /// Point file of the original run.
        baseline: PathBuf,
        /// Point file of the mutant run.
        candidate: PathBuf,
    },
    /// Show progress of the run in the output directory.
    Status {
        /// Config file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Project directory.
        #[arg(long)]
        project: Option<PathBuf>,
        /// Output directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the verdict summary of the run in the output directory.
    Summary {
        /// Config file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Project directory.
        #[arg(long)]
        project: Option<PathBuf>,
        /// Output directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Load the config file, then apply `--project` before the other path flags so
/// default paths follow the project.
fn load_config(
    path: Option<&Path>,
    project: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<TriageConfig> {
    let mut config = TriageConfig::load(path).context("failed to load configuration")?;
    if let Some(project) = project {
        config = config.with_project_dir(project);
    }
    if let Some(output) = output {
        config = config.with_output_dir(output);
    }
    Ok(config)
}

fn print_summary_line(summary: &RunSummary) {
    println!(
        "summary: equivalent={}, distinguishable={}, incomparable={}, skipped={}, pending={}",
        summary.equivalent,
        summary.distinguishable,
        summary.incomparable,
        summary.skipped,
        summary.pending
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Observe {
            config,
            project,
            report,
            output,
            timeout_secs,
        } => {
            let mut config = load_config(config.as_deref(), project, output)?;
            if let Some(report) = report {
                config = config.with_method_report(report);
            }
            if let Some(secs) = timeout_secs {
                config = config.with_timeout_secs(secs);
            }
            config.validate()?;

            let interrupt = Arc::new(AtomicBool::new(false));
            install_signal_handler(Arc::clone(&interrupt))?;
            let run = run_observation(&config, interrupt)?;
            let summary = RunSummary::from_snapshot(&run.snapshot);
            println!("run id: {}", run.run_id);
            println!("output dir: {}", run.output_dir.display());
            print_summary_line(&summary);
            if run.interrupted {
                println!("interrupted: remaining methods were not observed");
            }
        }
        Command::Diff {
            baseline,
            candidate,
        } => {
            let baseline: PointRecord = read_json(&baseline)?;
            let candidate: PointRecord = read_json(&candidate)?;
            if baseline.point != candidate.point {
                tracing::warn!(
                    baseline = %baseline.point,
                    candidate = %candidate.point,
                    "comparing different execution points"
                );
            }
            let report = diff(&baseline.snapshot, &candidate.snapshot);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Status {
            config,
            project,
            output,
        } => {
            let config = load_config(config.as_deref(), project, output)?;
            let snapshot = load_run_status(&config)?;
            let summary = RunSummary::from_snapshot(&snapshot);
            println!("run id: {}", snapshot.run_id);
            println!("completed: {}", snapshot.completed);
            println!("interrupted: {}", snapshot.interrupted);
            if let Some(reason) = &snapshot.aborted {
                println!("aborted: {reason}");
            }
            println!(
                "methods: started={}, selected={}, skipped={}",
                snapshot.methods.len(),
                summary.methods,
                summary.methods_skipped
            );
            print_summary_line(&summary);
            if !summary.unrestored.is_empty() {
                println!("unrestored methods: {:?}", summary.unrestored);
            }
        }
        Command::Summary {
            config,
            project,
            output,
        } => {
            let config = load_config(config.as_deref(), project, output)?;
            let path = ObservationLayout::new(&config.output_dir).summary_path();
            match std::fs::read_to_string(&path) {
                Ok(text) => println!("{}", text.trim_end()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    println!("{}", render_run_summary(&config)?);
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to read {}", path.display()));
                }
            }
        }
    }

    Ok(())
}
