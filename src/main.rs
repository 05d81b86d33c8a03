//! pumlgen - Render PlantUML diagrams through a retrying engine orchestrator.
//!
//! # Usage
//!
//! ```bash
//! pumlgen tasks
//! pumlgen run
//! pumlgen run plantumlSequence --format png
//! pumlgen render docs/sequence.puml
//! pumlgen batch docs/diagrams --jobs 4
//! pumlgen watch
//! ```

use std::error::Error as StdError;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use pumlgen::config::{EngineOverrides, OptionOverrides, Project, Strategy, default_declaration_path};
use pumlgen::diagram::{Diagram, Format, strip_extension};
use pumlgen::error::{BatchError, TaskError};
use pumlgen::perf;
use pumlgen::render::DiagramRenderer;
use pumlgen::task::registry::{ALL_TASK_NAME, RegisteredTask, TaskKind};
use pumlgen::task::{GenerateDiagramTask, GenerateDiagramsTask, RunSummary, TaskGraph, TaskRunner, register_tasks};
use pumlgen::watcher::{DEFAULT_DEBOUNCE, SourceWatcher};

const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Render PlantUML diagrams to SVG, PNG or text
#[derive(Parser, Debug)]
#[command(name = "pumlgen", version, about, long_about = None)]
struct Cli {
    /// Declaration file (defaults to ./pumlgen.json5)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log per-diagram render timings
    #[arg(long, global = true)]
    perf: bool,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OverrideArgs {
    /// Output format
    #[arg(long, value_enum, global = true)]
    format: Option<Format>,

    /// Directory receiving rendered artifacts
    #[arg(long, value_name = "DIR", global = true)]
    output_dir: Option<PathBuf>,

    /// Diagram server base URL for the remote strategy
    #[arg(long, value_name = "URL", global = true)]
    server: Option<String>,

    /// Rendering strategy
    #[arg(long, value_enum, global = true)]
    strategy: Option<Strategy>,

    /// Engine command line, e.g. "java -jar plantuml.jar"
    #[arg(long, value_name = "CMD", global = true)]
    engine: Option<String>,

    /// Per-attempt engine timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,

    /// Maximum number of concurrent renders
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Append the format suffix to artifact names
    #[arg(long, global = true)]
    suffix: bool,
}

impl OverrideArgs {
    fn layers(&self) -> (OptionOverrides, EngineOverrides) {
        let options = OptionOverrides {
            output_dir: self.output_dir.clone(),
            format: self.format.map(|f| f.to_string()),
            server_path: self.server.clone(),
            strategy: self.strategy.map(|s| s.to_string()),
            suffix: self.suffix.then_some(true),
            jobs: self.jobs,
        };
        let engine = EngineOverrides {
            command: self
                .engine
                .as_deref()
                .map(|cmd| cmd.split_whitespace().map(ToOwned::to_owned).collect()),
            timeout_secs: self.timeout,
            headless: None,
        };
        (options, engine)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered tasks
    Tasks {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run tasks and their dependencies (default: plantumlAll)
    Run {
        #[arg(value_name = "TASK")]
        tasks: Vec<String>,
    },
    /// Render a single diagram file
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Artifact name (defaults to the file name without extension)
        #[arg(long)]
        name: Option<String>,
    },
    /// Render every file under a directory
    Batch {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Run tasks, then re-run them whenever their sources change
    Watch {
        #[arg(value_name = "TASK")]
        tasks: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    if cli.perf {
        filter = filter.add_directive("pumlgen::perf=info".parse()?);
    }
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
    perf::set_enabled(cli.perf);

    let config_path = cli.config.clone().unwrap_or_else(default_declaration_path);
    let (option_overrides, engine_overrides) = cli.overrides.layers();
    let project = Project::load(&config_path, &option_overrides, &engine_overrides)
        .with_context(|| format!("Invalid declaration {}", config_path.display()))?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    let renderer = DiagramRenderer::for_options(&project.options, &project.engine).with_cancellation(cancel.clone());

    match cli.command {
        Command::Tasks { json } => {
            let graph = register_tasks(&project)?;
            list_tasks(&graph, json)
        }
        Command::Run { tasks } => {
            let graph = register_tasks(&project)?;
            let runner = TaskRunner::new(project.options.clone(), renderer);
            let summary = runner.run(&graph, &default_tasks(tasks)).await?;
            finish(&summary)
        }
        Command::Render { file, name } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| strip_extension(&n.to_string_lossy()).to_string())
                    .context("Diagram file has no name")?,
            };
            let diagram = Diagram::new(name, file)?;
            let (artifact, _) = GenerateDiagramTask::new(&diagram, &project.options)
                .execute(&renderer)
                .await
                .with_context(|| format!("Failed to render {}", diagram.source_file().display()))?;
            println!("{}", artifact.display());
            Ok(())
        }
        Command::Batch { dir } => {
            match GenerateDiagramsTask::new(&dir, &project.options).execute(&renderer).await {
                Ok(summary) => {
                    for artifact in &summary.artifacts {
                        println!("{}", artifact.display());
                    }
                    Ok(())
                }
                Err(err) => {
                    print_batch_failures(&err);
                    Err(err).with_context(|| format!("Failed to render diagrams under {}", dir.display()))
                }
            }
        }
        Command::Watch { tasks } => {
            let graph = register_tasks(&project)?;
            let runner = TaskRunner::new(project.options.clone(), renderer);
            watch(&graph, &runner, &default_tasks(tasks), &cancel).await
        }
    }
}

fn default_tasks(tasks: Vec<String>) -> Vec<String> {
    if tasks.is_empty() {
        vec![ALL_TASK_NAME.to_string()]
    } else {
        tasks
    }
}

fn list_tasks(graph: &TaskGraph, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(graph.tasks())?);
        return Ok(());
    }
    let width = graph.tasks().iter().map(|t| t.name.len()).max().unwrap_or(0);
    for task in graph.tasks() {
        println!("{:<width$}  {}", task.name, task.description);
    }
    Ok(())
}

fn report(summary: &RunSummary) {
    for outcome in &summary.completed {
        for artifact in &outcome.artifacts {
            println!("{}", artifact.display());
        }
    }
    for failure in &summary.failures {
        eprintln!("error: {}", error_chain(failure));
        if let TaskError::Batch { source, .. } = failure {
            print_batch_failures(source);
        }
    }
}

fn finish(summary: &RunSummary) -> Result<()> {
    report(summary);
    if summary.is_success() {
        Ok(())
    } else {
        anyhow::bail!("{} task(s) failed", summary.failures.len())
    }
}

fn print_batch_failures(err: &BatchError) {
    if let BatchError::Failures { failures, .. } = err {
        for failure in failures {
            eprintln!("  {}", error_chain(failure));
        }
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

async fn watch(graph: &TaskGraph, runner: &TaskRunner, names: &[String], cancel: &CancellationToken) -> Result<()> {
    let resolved: Vec<&RegisteredTask> = graph.resolve(names)?;
    let mut files = Vec::new();
    let mut trees = Vec::new();
    for task in &resolved {
        match &task.kind {
            TaskKind::Diagram(diagram) => files.push(diagram.source_file().to_path_buf()),
            TaskKind::Batch(tree) => trees.push(tree.clone()),
            TaskKind::Aggregate => {}
        }
    }

    report(&runner.run(graph, names).await?);

    let ignored = [runner.options().output_dir.clone()];
    let mut watcher =
        SourceWatcher::new(&files, &trees, &ignored, DEFAULT_DEBOUNCE).context("Failed to start file watcher")?;
    eprintln!(
        "Watching {} file(s) and {} tree(s); press Ctrl-C to stop",
        files.len(),
        trees.len()
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(WATCH_POLL_INTERVAL) => {}
        }
        let Some(changed) = watcher.take_changes() else {
            continue;
        };
        let affected = graph.tasks_affected_by(&resolved, &changed);
        if affected.is_empty() {
            continue;
        }
        report(&runner.run(graph, &affected).await?);
    }
    Ok(())
}
