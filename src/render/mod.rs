//! Diagram rendering with bounded, jittered retries.
//!
//! A [`RenderEngine`] performs exactly one opaque engine invocation. The
//! [`DiagramRenderer`] wraps an engine with the reliability contract:
//!
//! - the source file must exist (no retry otherwise)
//! - every attempt is a full re-invocation writing into a staged temp file
//! - failed attempts are retried up to [`RetryPolicy::max_attempts`] times,
//!   sleeping a full-jitter delay in between
//! - only a successful attempt is renamed onto the output path

mod local;
mod remote;
mod retry;
mod staging;

pub use local::LocalEngine;
pub use remote::{RemoteEngine, diagram_url, encode_diagram};
pub use retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY, FullJitter, RetryPolicy};
pub use staging::StagedArtifact;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{EngineSettings, RenderOptions, Strategy};
use crate::diagram::Format;
use crate::error::{EngineError, RenderError};
use crate::perf;

/// One invocation of an external rendering engine.
///
/// Implementations write the artifact for `source` in `format` to `dest`
/// and must be safe to call again on the same input after a failure.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn render_once(&self, source: &Path, format: Format, dest: &Path) -> Result<(), EngineError>;
}

/// Result of a successful render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderReport {
    /// Engine invocations made, including the successful one.
    pub attempts: u32,
    /// Total time spent sleeping between attempts.
    pub backoff: Duration,
}

/// Renders diagrams through an engine, retrying failed attempts.
#[derive(Clone)]
pub struct DiagramRenderer {
    engine: Arc<dyn RenderEngine>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DiagramRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagramRenderer")
            .field("engine", &self.engine.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DiagramRenderer {
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            engine,
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Renderer for the strategy selected in `options`.
    pub fn for_options(options: &RenderOptions, engine: &EngineSettings) -> Self {
        let engine: Arc<dyn RenderEngine> = match options.strategy {
            Strategy::Local => Arc::new(LocalEngine::new(engine.clone())),
            Strategy::Remote => Arc::new(RemoteEngine::new(options.server_path.clone(), engine.timeout)),
        };
        Self::new(engine)
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stop retrying (and abort the running attempt) once `token` fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Render `source` as `format` into `output`.
    ///
    /// The parent directory of `output` must already exist.
    ///
    /// # Errors
    /// - [`RenderError::SourceNotFound`] when the source is missing
    /// - [`RenderError::Staging`] when the output directory is unusable
    /// - [`RenderError::RetriesExhausted`] with the last attempt's error
    /// - [`RenderError::Cancelled`] when cancelled between or during attempts
    pub async fn render(&self, source: &Path, format: Format, output: &Path) -> Result<RenderReport, RenderError> {
        let _scope = perf::scope("render", output.display().to_string());

        if !source.is_file() {
            return Err(RenderError::SourceNotFound(source.to_path_buf()));
        }
        let staged = StagedArtifact::new(output).map_err(|source| RenderError::Staging {
            path: output.to_path_buf(),
            source,
        })?;

        let mut attempt = 0;
        let mut backoff = Duration::ZERO;
        loop {
            if self.cancel.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            attempt += 1;

            let result = tokio::select! {
                () = self.cancel.cancelled() => return Err(RenderError::Cancelled),
                result = self.attempt(source, format, &staged) => result,
            };

            match result {
                Ok(()) => {
                    staged.commit().map_err(|source| RenderError::Staging {
                        path: output.to_path_buf(),
                        source,
                    })?;
                    debug!(
                        engine = self.engine.name(),
                        attempts = attempt,
                        output = %output.display(),
                        "rendered diagram"
                    );
                    return Ok(RenderReport { attempts: attempt, backoff });
                }
                Err(err) if self.policy.should_retry(attempt) => {
                    let delay = self.policy.backoff.delay(attempt - 1, &mut rand::thread_rng());
                    warn!(
                        engine = self.engine.name(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        source = %source.display(),
                        "render attempt failed: {err}"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => return Err(RenderError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    backoff += delay;
                }
                Err(last) => {
                    return Err(RenderError::RetriesExhausted {
                        attempts: attempt,
                        last,
                    });
                }
            }
        }
    }

    /// Blocking form of [`render`](Self::render) for callers outside an
    /// async runtime.
    ///
    /// # Errors
    /// Same as [`render`](Self::render), plus [`RenderError::Runtime`].
    ///
    /// # Panics
    /// Panics if called from within a tokio runtime.
    pub fn render_blocking(&self, source: &Path, format: Format, output: &Path) -> Result<RenderReport, RenderError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(RenderError::Runtime)?;
        runtime.block_on(self.render(source, format, output))
    }

    async fn attempt(&self, source: &Path, format: Format, staged: &StagedArtifact) -> Result<(), EngineError> {
        staged.reset()?;
        self.engine.render_once(source, format, staged.path()).await?;
        staged.ensure_written()
    }
}
