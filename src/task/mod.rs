//! Orchestration tasks: resolve declarations into renderer invocations.
//!
//! - [`GenerateDiagramTask`]: one declared diagram
//! - [`GenerateDiagramsTask`]: every file under a source tree
//! - [`registry`]: task naming, the umbrella task and execution

mod batch;
pub mod registry;
mod single;

pub use batch::{BatchItem, BatchSummary, GenerateDiagramsTask};
pub use registry::{RegisteredTask, RunSummary, TaskGraph, TaskKind, TaskRunner, register_tasks};
pub use single::GenerateDiagramTask;

use std::fs;
use std::io;
use std::path::Path;

/// Create `dir` and its parents. An existing directory, including one
/// created concurrently by another task, counts as success.
///
/// # Errors
/// Returns the I/O error if the directory cannot be created.
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(_) if dir.is_dir() => Ok(()),
        Err(err) => Err(err),
    }
}
