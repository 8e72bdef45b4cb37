//! stepline - fail-fast pipeline runner CLI
//!
//! ## Commands
//!
//! - `run`: execute a pipeline definition and report the outcome
//! - `validate`: parse a pipeline definition and list its steps
//!
//! Exit codes: 0 succeeded, 1 step failed, 2 invalid definition,
//! 3 runner error (journal, report or events output), 124 step timed out,
//! 127 step command not found.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, Level};

use stepline_core::{
    exit_codes, ExecutionContext, MemoryJournal, PipelineError, RunEvent, RunGate, RunReport,
    StepStatus,
};

use crate::config::{load_pipeline, LoadedPipeline};

#[derive(Parser)]
#[command(name = "stepline")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fail-fast pipeline runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "STEPLINE_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline definition
    Run {
        /// Pipeline definition file (TOML, or JSON by extension)
        #[arg(default_value = "stepline.toml", env = "STEPLINE_FILE")]
        file: PathBuf,

        /// Working directory (overrides the definition's workdir)
        #[arg(short = 'C', long, env = "STEPLINE_WORKDIR")]
        workdir: Option<PathBuf>,

        /// Extra environment variable for every step (KEY=VALUE, repeatable)
        #[arg(short, long = "env", value_parser = parse_env_pair)]
        env_vars: Vec<(String, String)>,

        /// Default step timeout in seconds (0 disables)
        #[arg(long, env = "STEPLINE_TIMEOUT")]
        timeout: Option<u64>,

        /// Write the JSON run report here (`-` for stdout)
        #[arg(long, env = "STEPLINE_REPORT")]
        report: Option<PathBuf>,

        /// Write journaled run events here as JSON lines
        #[arg(long, env = "STEPLINE_EVENTS")]
        events: Option<PathBuf>,
    },

    /// Validate a pipeline definition without running it
    Validate {
        /// Pipeline definition file
        #[arg(default_value = "stepline.toml", env = "STEPLINE_FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    stepline_core::init_tracing(cli.json, level);

    match dispatch(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            error!(error = %format!("{:#}", failure.error), "stepline failed");
            eprintln!("error: {:#}", failure.error);
            ExitCode::from(failure.exit_code)
        }
    }
}

/// An error paired with the exit code it maps to.
#[derive(Debug)]
struct Failure {
    error: anyhow::Error,
    exit_code: u8,
}

impl Failure {
    fn config(error: anyhow::Error) -> Self {
        Self {
            error,
            exit_code: exit_codes::CONFIG_ERROR,
        }
    }

    fn runtime(error: anyhow::Error) -> Self {
        Self {
            error,
            exit_code: exit_codes::RUNTIME_ERROR,
        }
    }
}

async fn dispatch(command: Commands) -> std::result::Result<u8, Failure> {
    match command {
        Commands::Run {
            file,
            workdir,
            env_vars,
            timeout,
            report,
            events,
        } => {
            let loaded = load_pipeline(&file).map_err(Failure::config)?;
            cmd_run(
                loaded,
                workdir.as_deref(),
                &env_vars,
                timeout,
                report.as_deref(),
                events.as_deref(),
            )
            .await
            .map_err(Failure::runtime)
        }
        Commands::Validate { file } => cmd_validate(&file).map_err(Failure::config),
    }
}

fn parse_env_pair(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

async fn cmd_run(
    loaded: LoadedPipeline,
    workdir: Option<&Path>,
    env_vars: &[(String, String)],
    timeout: Option<u64>,
    report_path: Option<&Path>,
    events_path: Option<&Path>,
) -> Result<u8> {
    let mut pipeline = loaded.pipeline;
    if let Some(secs) = timeout {
        let runner = pipeline.runner().clone().with_default_timeout_secs(secs);
        pipeline = pipeline.with_runner(runner);
    }

    let workdir = workdir.map(Path::to_path_buf).unwrap_or(loaded.workdir);
    let ctx = ExecutionContext::from_current_process()
        .context("failed to capture process environment")?
        .with_cwd(&workdir)
        .with_vars(loaded.env)
        .with_vars(env_vars.iter().cloned());

    info!(
        pipeline = %pipeline.name(),
        workdir = %workdir.display(),
        steps = pipeline.steps().len(),
        context = %ctx.short_digest(),
        "running pipeline"
    );

    let journal = MemoryJournal::new();
    let report = match pipeline.run(&ctx, &journal).await {
        Ok(run) => RunReport::from_run(pipeline.name(), &run),
        Err(PipelineError::StepNotFound {
            step,
            source,
            completed,
        }) => RunReport::from_not_found(pipeline.name(), &step, &source, &completed),
        Err(e) => return Err(e).context("pipeline failed to run"),
    };
    let events = journal.events();

    let report_to_stdout = report_path.is_some_and(|p| p == Path::new("-"));
    if report_to_stdout {
        print_summary(&mut std::io::stderr().lock(), &report, &events)?;
    } else {
        print_summary(&mut std::io::stdout().lock(), &report, &events)?;
    }

    if let Some(path) = report_path {
        let json = report.to_json_pretty()?;
        if report_to_stdout {
            println!("{}", json);
        } else {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write report {}", path.display()))?;
        }
    }

    if let Some(path) = events_path {
        write_events(path, &events)?;
    }

    Ok(report.exit_code)
}

fn cmd_validate(file: &Path) -> Result<u8> {
    let loaded = load_pipeline(file)?;
    let pipeline = &loaded.pipeline;

    println!("Pipeline: {}", pipeline.name());
    println!("Workdir: {}", loaded.workdir.display());
    println!("Digest: {}", &pipeline.digest()[..12]);
    println!();
    for (i, step) in pipeline.steps().iter().enumerate() {
        let timeout = pipeline
            .runner()
            .timeout_for(step)
            .map(|s| format!("{}s", s))
            .unwrap_or_else(|| "none".to_string());
        println!("  {}. {} (timeout: {})", i + 1, step.name(), timeout);
        println!("     $ {}", step.display_command());
        for pattern in step.artifacts() {
            println!("     -> {}", pattern.as_str());
        }
    }
    println!();
    println!("✓ {} step(s) valid", pipeline.steps().len());
    Ok(exit_codes::SUCCESS)
}

fn print_summary(out: &mut dyn Write, report: &RunReport, events: &[RunEvent]) -> Result<()> {
    writeln!(out, "Pipeline: {}", report.pipeline)?;
    if let Some(run_id) = &report.run_id {
        writeln!(out, "Run ID: {}", run_id)?;
    }
    writeln!(
        out,
        "Status: {}",
        if report.is_success() { "✓ PASSED" } else { "✗ FAILED" }
    )?;
    writeln!(out)?;

    for step in &report.steps {
        let mark = if step.passed() { "✓" } else { "✗" };
        writeln!(
            out,
            "  {} {} ({}ms, {})",
            mark,
            step.step_name,
            step.duration_ms,
            describe_status(&step.status)
        )?;
        for matched in &step.artifacts {
            if matched.is_empty() {
                writeln!(out, "      {} (no matches)", matched.pattern)?;
            }
            for path in &matched.paths {
                writeln!(out, "      {}", path.display())?;
            }
        }
    }

    if let stepline_core::Outcome::StepNotFound { step, error } = &report.outcome {
        writeln!(out, "  ✗ {} (could not start: {})", step, error)?;
    }

    writeln!(out)?;
    let passed = report.steps.iter().filter(|s| s.passed()).count();
    writeln!(out, "Summary: {}/{} steps passed", passed, report.steps.len())?;

    let verdict = RunGate::evaluate(events);
    writeln!(
        out,
        "Gate: {}",
        if verdict.passed { "✓ PASSED" } else { "✗ FAILED" }
    )?;
    if !verdict.violations.is_empty() {
        writeln!(out, "Violations:")?;
        for violation in &verdict.violations {
            writeln!(out, "  - {}", violation)?;
        }
    }
    Ok(())
}

fn describe_status(status: &StepStatus) -> String {
    match status {
        StepStatus::Exited { code } => format!("exit code: {}", code),
        StepStatus::Terminated => "terminated by signal".to_string(),
        StepStatus::TimedOut { timeout_secs } => format!("timed out after {}s", timeout_secs),
    }
}

fn write_events(path: &Path, events: &[RunEvent]) -> Result<()> {
    let mut lines = String::new();
    for event in events {
        lines.push_str(&serde_json::to_string(event)?);
        lines.push('\n');
    }
    std::fs::write(path, lines)
        .with_context(|| format!("failed to write events {}", path.display()))
}
