use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::ensure_dir;
use crate::config::RenderOptions;
use crate::diagram::strip_extension;
use crate::error::{BatchError, FileFailure, RenderError};
use crate::render::DiagramRenderer;

/// One discovered source file and the artifact it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub source_file: PathBuf,
    pub output_file: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Written artifacts, sorted by path.
    pub artifacts: Vec<PathBuf>,
}

/// Renders every regular file under a source tree into the output directory.
///
/// Files are rendered independently and concurrently (bounded by
/// [`RenderOptions::jobs`]). A failing file does not stop the others; all
/// failures are reported together at the end.
#[derive(Debug, Clone)]
pub struct GenerateDiagramsTask<'a> {
    source_tree: &'a Path,
    options: &'a RenderOptions,
    reserved: Option<&'a HashMap<PathBuf, PathBuf>>,
    limit: Option<Arc<Semaphore>>,
}

impl<'a> GenerateDiagramsTask<'a> {
    pub const fn new(source_tree: &'a Path, options: &'a RenderOptions) -> Self {
        Self {
            source_tree,
            options,
            reserved: None,
            limit: None,
        }
    }

    /// Treat `reserved` outputs (artifact path to the source producing it)
    /// as already claimed by other tasks of the same run.
    #[must_use]
    pub fn with_reserved(mut self, reserved: &'a HashMap<PathBuf, PathBuf>) -> Self {
        self.reserved = Some(reserved);
        self
    }

    /// Share a render limit with other tasks instead of creating one from
    /// [`RenderOptions::jobs`].
    #[must_use]
    pub fn with_limit(mut self, limit: Arc<Semaphore>) -> Self {
        self.limit = Some(limit);
        self
    }

    pub const fn source_tree(&self) -> &Path {
        self.source_tree
    }

    /// Walk the source tree in file-name order.
    ///
    /// Directories and other non-regular entries are skipped, as is the
    /// output directory when it lives inside the tree. Files whose base name
    /// maps to an output already claimed by an earlier file, or reserved by
    /// another task, are returned as failures.
    ///
    /// # Errors
    /// Returns [`BatchError::SourceTree`] if the tree cannot be read.
    pub fn discover(&self) -> Result<(Vec<BatchItem>, Vec<FileFailure>), BatchError> {
        // `./docs/out` and `docs/out` must compare equal.
        let output_dir = absolute(&self.options.output_dir);
        let mut items = Vec::new();
        let mut conflicts = Vec::new();
        let mut claimed: HashMap<PathBuf, PathBuf> = self.reserved.cloned().unwrap_or_default();

        let walker = WalkDir::new(self.source_tree)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !absolute(entry.path()).starts_with(&output_dir));

        for entry in walker {
            let entry = entry.map_err(|source| BatchError::SourceTree {
                path: self.source_tree.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let output_file = {
                let file_name = entry.file_name().to_string_lossy();
                self.options.output_path(strip_extension(&file_name))
            };
            let source_file = entry.into_path();

            if let Some(first) = claimed.get(&output_file) {
                conflicts.push(FileFailure {
                    error: RenderError::OutputConflict {
                        output: output_file,
                        claimed_by: first.clone(),
                    },
                    source_file,
                });
                continue;
            }
            claimed.insert(output_file.clone(), source_file.clone());
            items.push(BatchItem {
                source_file,
                output_file,
            });
        }
        Ok((items, conflicts))
    }

    /// Render every discovered file.
    ///
    /// # Errors
    /// - [`BatchError::OutputDirectoryUncreatable`] before anything renders
    /// - [`BatchError::SourceTree`] if the tree cannot be scanned
    /// - [`BatchError::Cancelled`] if the renderer was cancelled
    /// - [`BatchError::Failures`] listing every file that failed
    pub async fn execute(&self, renderer: &DiagramRenderer) -> Result<BatchSummary, BatchError> {
        let output_dir = &self.options.output_dir;
        ensure_dir(output_dir).map_err(|source| BatchError::OutputDirectoryUncreatable {
            path: output_dir.clone(),
            source,
        })?;

        let (items, mut failures) = self.discover()?;
        let total = items.len() + failures.len();
        info!(
            tree = %self.source_tree.display(),
            files = total,
            jobs = self.options.jobs,
            "generating diagrams"
        );

        let semaphore = self
            .limit
            .clone()
            .unwrap_or_else(|| Arc::new(Semaphore::new(self.options.jobs.max(1))));
        let mut set = JoinSet::new();
        for item in items {
            let renderer = renderer.clone();
            let semaphore = Arc::clone(&semaphore);
            let format = self.options.format;
            set.spawn(async move {
                let result = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| RenderError::Cancelled)?;
                    renderer.render(&item.source_file, format, &item.output_file).await
                }
                .await;
                (item, result)
            });
        }

        let mut artifacts = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((item, Ok(_))) => artifacts.push(item.output_file),
                Ok((item, Err(error))) => {
                    warn!(source = %item.source_file.display(), "diagram failed: {error}");
                    failures.push(FileFailure {
                        source_file: item.source_file,
                        error,
                    });
                }
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => {}
            }
        }

        if renderer.cancellation().is_cancelled() {
            return Err(BatchError::Cancelled);
        }
        if !failures.is_empty() {
            failures.sort_by(|a, b| a.source_file.cmp(&b.source_file));
            return Err(BatchError::Failures { total, failures });
        }
        artifacts.sort();
        Ok(BatchSummary { artifacts })
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(output_dir: PathBuf) -> RenderOptions {
        RenderOptions {
            output_dir,
            ..RenderOptions::defaults(Path::new("."))
        }
    }

    #[test]
    fn test_discover_skips_directories_and_strips_extension() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("nested.dir")).unwrap();
        std::fs::write(src.join("a.puml"), "a").unwrap();
        std::fs::write(src.join("b.puml"), "b").unwrap();
        std::fs::write(src.join("nested.dir").join("c.v2.puml"), "c").unwrap();
        let opts = options(dir.path().join("out"));

        let (items, conflicts) = GenerateDiagramsTask::new(&src, &opts).discover().unwrap();

        assert!(conflicts.is_empty());
        let outputs: Vec<_> = items.iter().map(|i| i.output_file.clone()).collect();
        assert_eq!(
            outputs,
            vec![
                dir.path().join("out/a"),
                dir.path().join("out/b"),
                dir.path().join("out/c.v2"),
            ]
        );
    }

    #[test]
    fn test_discover_reports_colliding_base_names() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("a.puml"), "a").unwrap();
        std::fs::write(src.join("sub").join("a.puml"), "a2").unwrap();
        let opts = options(dir.path().join("out"));

        let (items, conflicts) = GenerateDiagramsTask::new(&src, &opts).discover().unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].source_file, src.join("sub").join("a.puml"));
        assert!(matches!(conflicts[0].error, RenderError::OutputConflict { .. }));
    }

    #[test]
    fn test_discover_ignores_output_dir_inside_tree() {
        let dir = tempdir().unwrap();
        let src = dir.path().to_path_buf();
        std::fs::write(src.join("a.puml"), "a").unwrap();
        let out = src.join("build");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("a"), "<svg/>").unwrap();
        let opts = options(out);

        let (items, conflicts) = GenerateDiagramsTask::new(&src, &opts).discover().unwrap();

        assert_eq!(items.len(), 1);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_discover_honours_reserved_outputs() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.puml"), "a").unwrap();
        std::fs::write(src.join("b.puml"), "b").unwrap();
        let opts = options(dir.path().join("out"));
        let declared = dir.path().join("a.puml");
        let reserved = HashMap::from([(opts.output_path("a"), declared.clone())]);

        let (items, conflicts) = GenerateDiagramsTask::new(&src, &opts)
            .with_reserved(&reserved)
            .discover()
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_file, src.join("b.puml"));
        assert_eq!(conflicts.len(), 1);
        assert!(matches!(
            conflicts[0].error,
            RenderError::OutputConflict { ref claimed_by, .. } if *claimed_by == declared
        ));
    }

    #[test]
    fn test_discover_missing_tree_is_an_error() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path().join("out"));
        let missing = dir.path().join("missing");
        let err = GenerateDiagramsTask::new(&missing, &opts).discover().unwrap_err();
        assert!(matches!(err, BatchError::SourceTree { .. }));
    }
}
