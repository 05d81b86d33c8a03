//! Error types for configuration, engine attempts, rendering and tasks.
//!
//! Attempt-level failures ([`EngineError`]) never escape the renderer on
//! their own: they are retried and, once the attempt budget is spent,
//! wrapped in [`RenderError::RetriesExhausted`].

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Invalid or incomplete declarations, detected before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown output format `{0}` (expected one of: svg, png, txt)")]
    UnknownFormat(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("diagram `{0}` is declared more than once")]
    DuplicateDiagram(String),

    #[error("invalid diagram name `{0}`: {1}")]
    InvalidName(String, &'static str),

    #[error("diagrams `{0}` and `{1}` map to the same task name")]
    TaskNameConflict(String, String),

    #[error("unknown render strategy `{0}` (expected `local` or `remote`)")]
    UnknownStrategy(String),

    #[error("failed to read declaration file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse declaration file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// A single failed engine invocation. Every variant is retryable.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rendering engine `{0}` not found on PATH")]
    EngineNotFound(String),

    #[error("failed to start rendering engine `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rendering engine exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("rendering engine did not finish within {0:?}")]
    Timeout(Duration),

    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("I/O error while rendering")]
    Io(#[from] std::io::Error),

    #[error("rendering engine produced no output at {0}")]
    EmptyOutput(PathBuf),
}

/// Fatal outcome of one renderer call.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("unable to create output directory {path}")]
    OutputDirectoryUncreatable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rendering failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: EngineError,
    },

    #[error("failed to stage artifact for {path}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output {output} is already produced from {claimed_by}")]
    OutputConflict { output: PathBuf, claimed_by: PathBuf },

    #[error("failed to start async runtime")]
    Runtime(#[source] std::io::Error),

    #[error("rendering was cancelled")]
    Cancelled,
}

impl RenderError {
    /// The error from the final attempt, when retries ran out.
    pub const fn last_engine_error(&self) -> Option<&EngineError> {
        match self {
            Self::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

/// One failed file inside a batch run.
#[derive(Debug, Error)]
#[error("{source_file}")]
pub struct FileFailure {
    pub source_file: PathBuf,
    #[source]
    pub error: RenderError,
}

/// Outcome of a batch run that did not fully succeed.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("unable to create output directory {path}")]
    OutputDirectoryUncreatable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to scan source tree {path}")]
    SourceTree {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("{} of {total} diagrams failed to render", .failures.len())]
    Failures {
        total: usize,
        failures: Vec<FileFailure>,
    },

    #[error("batch rendering was cancelled")]
    Cancelled,
}

/// Failure of a registered task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task `{0}` not found")]
    UnknownTask(String),

    #[error("task `{task}` failed")]
    Failed {
        task: String,
        #[source]
        source: RenderError,
    },

    #[error("task `{task}` failed")]
    Batch {
        task: String,
        #[source]
        source: BatchError,
    },
}

impl TaskError {
    /// Name of the task this error belongs to.
    pub fn task_name(&self) -> &str {
        match self {
            Self::UnknownTask(name) => name,
            Self::Failed { task, .. } | Self::Batch { task, .. } => task,
        }
    }
}
