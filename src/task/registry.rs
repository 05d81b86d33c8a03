//! Task registration and execution.
//!
//! Every declared diagram gets a `plantuml<Name>` task. The umbrella task
//! `plantumlAll` depends on all of them. A declared source tree adds the
//! `plantumlDir` batch task.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

use super::{GenerateDiagramTask, GenerateDiagramsTask};
use crate::config::{Project, RenderOptions};
use crate::diagram::Diagram;
use crate::error::{ConfigError, RenderError, TaskError};
use crate::render::DiagramRenderer;

pub const TASK_GROUP: &str = "plantuml";
pub const TASK_PREFIX: &str = "plantuml";
pub const ALL_TASK_NAME: &str = "plantumlAll";
pub const DIR_TASK_NAME: &str = "plantumlDir";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Diagram(Diagram),
    Batch(PathBuf),
    /// Does nothing itself; only pulls in its dependencies.
    Aggregate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredTask {
    pub name: String,
    pub group: &'static str,
    pub description: String,
    pub depends_on: Vec<String>,
    #[serde(skip)]
    pub kind: TaskKind,
}

/// Name of the task generated for a diagram: `plantuml` + capitalized name.
pub fn task_name_for(diagram_name: &str) -> String {
    let mut chars = diagram_name.chars();
    let capitalized = chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect::<String>()
    });
    format!("{TASK_PREFIX}{capitalized}")
}

/// Register one task per diagram, the umbrella task and, when a source tree
/// is declared, the batch task.
///
/// # Errors
/// Returns [`ConfigError::TaskNameConflict`] when two diagram names produce
/// the same task name (e.g. `api` and `Api`) or shadow a built-in task.
pub fn register_tasks(project: &Project) -> Result<TaskGraph, ConfigError> {
    let mut tasks = Vec::with_capacity(project.diagrams().len() + 2);
    let mut owners: HashMap<String, String> = HashMap::new();
    owners.insert(ALL_TASK_NAME.to_string(), ALL_TASK_NAME.to_string());
    owners.insert(DIR_TASK_NAME.to_string(), DIR_TASK_NAME.to_string());

    let mut all_deps = Vec::with_capacity(project.diagrams().len());
    for diagram in project.diagrams() {
        let name = task_name_for(diagram.name());
        if let Some(owner) = owners.get(&name) {
            return Err(ConfigError::TaskNameConflict(
                owner.clone(),
                diagram.name().to_string(),
            ));
        }
        owners.insert(name.clone(), diagram.name().to_string());
        all_deps.push(name.clone());
        tasks.push(RegisteredTask {
            name,
            group: TASK_GROUP,
            description: format!("Generate plantuml diagram {}", diagram.name()),
            depends_on: Vec::new(),
            kind: TaskKind::Diagram(diagram.clone()),
        });
    }

    tasks.insert(
        0,
        RegisteredTask {
            name: ALL_TASK_NAME.to_string(),
            group: TASK_GROUP,
            description: "Generate all plantuml diagrams".to_string(),
            depends_on: all_deps,
            kind: TaskKind::Aggregate,
        },
    );

    if let Some(tree) = &project.sources {
        tasks.push(RegisteredTask {
            name: DIR_TASK_NAME.to_string(),
            group: TASK_GROUP,
            description: format!("Generate plantuml diagrams under {}", tree.display()),
            depends_on: Vec::new(),
            kind: TaskKind::Batch(tree.clone()),
        });
    }

    Ok(TaskGraph { tasks })
}

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: Vec<RegisteredTask>,
}

impl TaskGraph {
    pub fn tasks(&self) -> &[RegisteredTask] {
        &self.tasks
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTask> {
        self.tasks.iter().find(|task| task.name == name)
    }

    /// Expand `names` and their dependencies into the tasks that do work,
    /// each listed once, dependencies first.
    ///
    /// # Errors
    /// Returns [`TaskError::UnknownTask`] for any unregistered name.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<&RegisteredTask>, TaskError> {
        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        for name in names {
            self.visit(name, &mut seen, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit<'a>(
        &'a self,
        name: &str,
        seen: &mut HashSet<&'a str>,
        ordered: &mut Vec<&'a RegisteredTask>,
    ) -> Result<(), TaskError> {
        let task = self
            .get(name)
            .ok_or_else(|| TaskError::UnknownTask(name.to_string()))?;
        if !seen.insert(task.name.as_str()) {
            return Ok(());
        }
        for dep in &task.depends_on {
            self.visit(dep, seen, ordered)?;
        }
        if task.kind != TaskKind::Aggregate {
            ordered.push(task);
        }
        Ok(())
    }

    /// Names of the tasks among `candidates` whose inputs include one of
    /// `changed`.
    pub fn tasks_affected_by(&self, candidates: &[&RegisteredTask], changed: &[PathBuf]) -> Vec<String> {
        let changed: Vec<PathBuf> = changed.iter().map(|p| canonical(p)).collect();
        candidates
            .iter()
            .filter(|task| match &task.kind {
                TaskKind::Diagram(diagram) => {
                    let source = canonical(diagram.source_file());
                    changed.iter().any(|p| *p == source)
                }
                TaskKind::Batch(tree) => {
                    let tree = canonical(tree);
                    changed.iter().any(|p| p.starts_with(&tree))
                }
                TaskKind::Aggregate => false,
            })
            .map(|task| task.name.clone())
            .collect()
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Artifacts written by one successful task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task: String,
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<TaskOutcome>,
    pub failures: Vec<TaskError>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Executes resolved tasks against one renderer and one set of options.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    options: Arc<RenderOptions>,
    renderer: DiagramRenderer,
}

impl TaskRunner {
    pub fn new(options: RenderOptions, renderer: DiagramRenderer) -> Self {
        Self {
            options: Arc::new(options),
            renderer,
        }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub const fn renderer(&self) -> &DiagramRenderer {
        &self.renderer
    }

    /// Run `names` and everything they depend on.
    ///
    /// Independent tasks run concurrently, at most `jobs` renders at a time
    /// across all of them. A batch file whose artifact is also produced by a
    /// declared diagram in the same run fails with
    /// [`RenderError::OutputConflict`]. A failed task does not stop the
    /// others; every failure is collected in the summary.
    ///
    /// # Errors
    /// Returns [`TaskError::UnknownTask`] before running anything if a name
    /// is not registered.
    pub async fn run(&self, graph: &TaskGraph, names: &[String]) -> Result<RunSummary, TaskError> {
        let tasks = graph.resolve(names)?;
        let semaphore = Arc::new(Semaphore::new(self.options.jobs.max(1)));
        let reserved = Arc::new(self.declared_outputs(&tasks));
        let mut set = JoinSet::new();

        for task in tasks {
            let name = task.name.clone();
            let kind = task.kind.clone();
            let options = Arc::clone(&self.options);
            let renderer = self.renderer.clone();
            let semaphore = Arc::clone(&semaphore);
            let reserved = Arc::clone(&reserved);
            set.spawn(async move { run_task(name, kind, &options, &renderer, &semaphore, &reserved).await });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => summary.completed.push(outcome),
                Ok(Err(err)) => summary.failures.push(err),
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => {}
            }
        }
        summary.completed.sort_by(|a, b| a.task.cmp(&b.task));
        summary
            .failures
            .sort_by(|a, b| a.task_name().cmp(b.task_name()));
        Ok(summary)
    }

    /// Artifacts of the declared diagrams among `tasks`, mapped to their sources.
    fn declared_outputs(&self, tasks: &[&RegisteredTask]) -> HashMap<PathBuf, PathBuf> {
        tasks
            .iter()
            .filter_map(|task| match &task.kind {
                TaskKind::Diagram(diagram) => Some((
                    self.options.output_path(diagram.name()),
                    diagram.source_file().to_path_buf(),
                )),
                TaskKind::Batch(_) | TaskKind::Aggregate => None,
            })
            .collect()
    }
}

async fn run_task(
    name: String,
    kind: TaskKind,
    options: &RenderOptions,
    renderer: &DiagramRenderer,
    semaphore: &Arc<Semaphore>,
    reserved: &HashMap<PathBuf, PathBuf>,
) -> Result<TaskOutcome, TaskError> {
    match kind {
        TaskKind::Diagram(diagram) => {
            let result = async {
                let _permit = semaphore.acquire().await.map_err(|_| RenderError::Cancelled)?;
                GenerateDiagramTask::new(&diagram, options).execute(renderer).await
            }
            .await;
            match result {
                Ok((artifact, report)) => {
                    info!(task = %name, attempts = report.attempts, "task finished");
                    Ok(TaskOutcome {
                        task: name,
                        artifacts: vec![artifact],
                    })
                }
                Err(source) => Err(TaskError::Failed { task: name, source }),
            }
        }
        TaskKind::Batch(tree) => {
            let batch = GenerateDiagramsTask::new(&tree, options)
                .with_reserved(reserved)
                .with_limit(Arc::clone(semaphore));
            match batch.execute(renderer).await {
                Ok(summary) => {
                    info!(task = %name, artifacts = summary.artifacts.len(), "task finished");
                    Ok(TaskOutcome {
                        task: name,
                        artifacts: summary.artifacts,
                    })
                }
                Err(source) => Err(TaskError::Batch { task: name, source }),
            }
        }
        TaskKind::Aggregate => Ok(TaskOutcome {
            task: name,
            artifacts: Vec::new(),
        }),
    }
}
