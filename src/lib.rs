// Only allow lints that are either transitive-dependency noise or
// genuinely opinionated style choices that don't indicate real issues.
#![allow(
    // Transitive dependency version mismatches we can't control
    clippy::multiple_crate_versions,
    // module_name_repetitions is pure style preference (e.g. render::RenderError)
    clippy::module_name_repetitions
)]

//! # pumlgen
//!
//! Renders PlantUML diagram sources to SVG, PNG or text artifacts.
//!
//! pumlgen does not lay out diagrams itself. It orchestrates an external
//! rendering engine:
//! - a local `plantuml` subprocess (default)
//! - a remote PlantUML server (opt-in)
//!
//! ## Architecture
//!
//! - **Declaration**: `pumlgen.json5` names diagrams and options
//! - **Registration**: one task per diagram plus the `plantumlAll` umbrella
//! - **Orchestration**: tasks compute output paths and create directories
//! - **Rendering**: the engine is retried with full-jitter backoff and its
//!   output is staged, then renamed into place
//!
//! ## Modules
//!
//! - [`config`]: Declaration file and option layering
//! - [`diagram`]: Diagram descriptors and output formats
//! - [`render`]: Engines and the retrying renderer
//! - [`task`]: Single, batch and umbrella tasks
//! - [`watcher`]: Continuous rendering on source changes
//! - [`error`]: Error taxonomy

pub mod config;
pub mod diagram;
pub mod error;
pub mod perf;
pub mod render;
pub mod task;
pub mod watcher;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Project, RenderOptions, Strategy};
    pub use crate::diagram::{Diagram, Format};
    pub use crate::error::{BatchError, ConfigError, EngineError, RenderError, TaskError};
    pub use crate::render::{DiagramRenderer, RenderEngine, RetryPolicy};
    pub use crate::task::{GenerateDiagramTask, GenerateDiagramsTask, TaskRunner, register_tasks};
}
