//! Local engine: runs the PlantUML command line as a child process.
//!
//! The engine never shares a process with us, so an engine that exits on
//! error can only end its own child process. That failure then comes back
//! as an ordinary attempt error.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::RenderEngine;
use crate::config::EngineSettings;
use crate::diagram::Format;
use crate::error::EngineError;

const MAX_STDERR_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct LocalEngine {
    settings: EngineSettings,
}

impl LocalEngine {
    pub const fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Engine arguments after the configured command prefix:
    /// `[-headless] -t<format> -ofile <dest> <source>`.
    pub fn arguments(&self, source: &Path, format: Format, dest: &Path) -> Vec<OsString> {
        let mut args = Vec::with_capacity(5);
        if self.settings.headless {
            args.push(OsString::from("-headless"));
        }
        args.push(OsString::from(format.engine_flag()));
        args.push(OsString::from("-ofile"));
        args.push(absolute(dest).into_os_string());
        args.push(absolute(source).into_os_string());
        args
    }

    fn program(&self) -> Result<(PathBuf, &[String]), EngineError> {
        let (program, leading) = self
            .settings
            .command
            .split_first()
            .ok_or_else(|| EngineError::EngineNotFound(String::new()))?;
        let resolved = which::which(program).map_err(|_| EngineError::EngineNotFound(program.clone()))?;
        Ok((resolved, leading))
    }
}

#[async_trait]
impl RenderEngine for LocalEngine {
    fn name(&self) -> &str {
        "local"
    }

    async fn render_once(&self, source: &Path, format: Format, dest: &Path) -> Result<(), EngineError> {
        let (program, leading) = self.program()?;
        let args = self.arguments(source, format, dest);
        debug!(program = %program.display(), ?leading, ?args, "invoking rendering engine");

        let child = Command::new(&program)
            .args(leading)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.settings.timeout, child.wait_with_output())
            .await
            .map_err(|_| EngineError::Timeout(self.settings.timeout))??;

        if output.status.success() {
            Ok(())
        } else {
            Err(EngineError::Failed {
                status: output.status,
                stderr: summarize_stderr(&output.stderr),
            })
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn summarize_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_STDERR_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed
        .chars()
        .rev()
        .take(MAX_STDERR_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}
