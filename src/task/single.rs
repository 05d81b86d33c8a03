use std::path::PathBuf;

use tracing::info;

use super::ensure_dir;
use crate::config::RenderOptions;
use crate::diagram::Diagram;
use crate::error::RenderError;
use crate::render::{DiagramRenderer, RenderReport};

/// Renders one declared diagram to `<outputDir>/<name>`.
#[derive(Debug, Clone, Copy)]
pub struct GenerateDiagramTask<'a> {
    diagram: &'a Diagram,
    options: &'a RenderOptions,
}

impl<'a> GenerateDiagramTask<'a> {
    pub const fn new(diagram: &'a Diagram, options: &'a RenderOptions) -> Self {
        Self { diagram, options }
    }

    pub fn output_file(&self) -> PathBuf {
        self.options.output_path(self.diagram.name())
    }

    /// Create the output directory if needed, then render.
    ///
    /// # Errors
    /// [`RenderError::OutputDirectoryUncreatable`] before any engine call if
    /// the directory cannot be created, otherwise the renderer's error.
    pub async fn execute(&self, renderer: &DiagramRenderer) -> Result<(PathBuf, RenderReport), RenderError> {
        let output = self.output_file();
        if let Some(parent) = output.parent() {
            ensure_dir(parent).map_err(|source| RenderError::OutputDirectoryUncreatable {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        info!(
            diagram = self.diagram.name(),
            source = %self.diagram.source_file().display(),
            output = %output.display(),
            format = %self.options.format,
            "generating diagram"
        );
        let report = renderer
            .render(self.diagram.source_file(), self.options.format, &output)
            .await?;
        Ok((output, report))
    }
}
