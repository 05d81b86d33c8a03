//! File watching for continuous rendering.
//!
//! Uses notify crate for cross-platform file system events.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Watches diagram sources and source trees, emitting debounced batches of
/// changed paths.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    files: Vec<PathBuf>,
    trees: Vec<PathBuf>,
    ignored: Vec<PathBuf>,
    debounce: Duration,
    pending_since: Option<Instant>,
    pending: BTreeSet<PathBuf>,
}

impl SourceWatcher {
    /// Watch `files` (through their parent directories) and `trees`
    /// (recursively). Events under `ignored`, typically the output
    /// directory, are dropped so our own writes never trigger a rerun.
    ///
    /// # Errors
    /// Returns an error if the watcher cannot be created or a path cannot be watched.
    pub fn new(files: &[PathBuf], trees: &[PathBuf], ignored: &[PathBuf], debounce: Duration) -> notify::Result<Self> {
        // Canonicalize so event paths from the OS (which are always absolute
        // and canonical) match our stored paths.
        let files: Vec<PathBuf> = files.iter().map(|p| canonical(p)).collect();
        let trees: Vec<PathBuf> = trees.iter().map(|p| canonical(p)).collect();
        let ignored: Vec<PathBuf> = ignored.iter().map(|p| canonical(p)).collect();

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;

        let file_roots: BTreeSet<PathBuf> = files.iter().map(|f| watch_root_for(f)).collect();
        for root in &file_roots {
            if trees.iter().any(|tree| root.starts_with(tree)) {
                continue;
            }
            watcher.watch(root, RecursiveMode::NonRecursive)?;
        }
        for tree in &trees {
            watcher.watch(tree, RecursiveMode::Recursive)?;
        }

        Ok(Self {
            _watcher: watcher,
            rx,
            files,
            trees,
            ignored,
            debounce,
            pending_since: None,
            pending: BTreeSet::new(),
        })
    }

    /// Returns the changed paths once a debounced change is ready.
    pub fn take_changes(&mut self) -> Option<Vec<PathBuf>> {
        let mut saw_relevant_event = false;
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(ev) => {
                    let relevant = self.relevant_paths(&ev);
                    if relevant.is_empty() {
                        continue;
                    }
                    debug!(kind = ?ev.kind, paths = ?relevant, "source change");
                    saw_relevant_event = true;
                    self.pending.extend(relevant);
                }
                Err(err) => warn!("watch error: {err}"),
            }
        }

        if saw_relevant_event {
            self.pending_since = Some(Instant::now());
        }

        let pending_since = self.pending_since?;
        if pending_since.elapsed() >= self.debounce {
            self.pending_since = None;
            return Some(std::mem::take(&mut self.pending).into_iter().collect());
        }
        None
    }

    fn relevant_paths(&self, event: &Event) -> Vec<PathBuf> {
        if matches!(event.kind, EventKind::Access(_)) {
            return Vec::new();
        }
        event
            .paths
            .iter()
            .filter(|path| !self.ignored.iter().any(|dir| path.starts_with(dir)))
            .filter(|path| {
                self.files.iter().any(|file| *path == file)
                    || self.trees.iter().any(|tree| path.starts_with(tree))
            })
            .cloned()
            .collect()
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn watch_root_for(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, EventAttributes, ModifyKind};
    use tempfile::tempdir;

    fn event(kind: EventKind, path: PathBuf) -> Event {
        Event {
            kind,
            paths: vec![path],
            attrs: EventAttributes::new(),
        }
    }

    #[test]
    fn test_watch_root_for_relative_file_is_dot() {
        let root = watch_root_for(Path::new("diagram1.puml"));
        assert_eq!(root, PathBuf::from("."));
    }

    #[test]
    fn test_relevance_of_files_trees_and_ignored_dirs() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path().canonicalize().expect("canonicalize");
        let file = base.join("a.puml");
        let tree = base.join("docs");
        let out = tree.join("out");
        std::fs::write(&file, "a").expect("write");
        std::fs::create_dir_all(&out).expect("mkdir");

        let watcher = SourceWatcher::new(
            &[file.clone()],
            &[tree.clone()],
            &[out.clone()],
            Duration::from_millis(10),
        )
        .expect("watcher");

        let modify = || EventKind::Modify(ModifyKind::Any);
        assert_eq!(watcher.relevant_paths(&event(modify(), file.clone())), vec![file.clone()]);
        assert_eq!(
            watcher.relevant_paths(&event(modify(), tree.join("x.puml"))).len(),
            1
        );
        assert!(watcher.relevant_paths(&event(modify(), out.join("x"))).is_empty());
        assert!(watcher.relevant_paths(&event(modify(), base.join("other.puml"))).is_empty());
        assert!(
            watcher
                .relevant_paths(&event(EventKind::Access(AccessKind::Any), file))
                .is_empty()
        );
    }

    #[test]
    fn test_real_file_modification_detected() {
        let dir = tempdir().expect("tempdir");
        let canonical_dir = dir.path().canonicalize().expect("canonicalize");
        let path = canonical_dir.join("watched.puml");
        std::fs::write(&path, "@startuml\n@enduml\n").expect("write");

        let mut watcher =
            SourceWatcher::new(&[path.clone()], &[], &[], Duration::from_millis(50)).expect("watcher");

        // Give the backend time to register the watch
        std::thread::sleep(Duration::from_millis(500));

        std::fs::write(&path, "@startuml\nA -> B\n@enduml\n").expect("write");

        // Poll until the change is ready or timeout after 5 seconds
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut detected = None;
        while Instant::now() < deadline {
            if let Some(changes) = watcher.take_changes() {
                detected = Some(changes);
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        let changes = detected.expect("watcher should detect real file modification within 5 seconds");
        assert!(changes.contains(&path));
    }
}
