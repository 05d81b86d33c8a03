//! Temp-file-then-rename artifact materialization.
//!
//! The engine writes into a hidden temp file next to the final artifact.
//! Only a successful attempt is renamed onto the real path, so a failed or
//! cancelled render never leaves a partial artifact behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;

use crate::error::EngineError;

#[derive(Debug)]
pub struct StagedArtifact {
    temp: TempPath,
    dest: PathBuf,
}

impl StagedArtifact {
    /// Reserve a temp file in the destination's directory.
    ///
    /// # Errors
    /// Fails if the directory does not exist or is not writable.
    pub fn new(dest: &Path) -> io::Result<Self> {
        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let stem = dest
            .file_name()
            .map_or_else(|| "artifact".into(), |name| name.to_string_lossy());

        let mut builder = tempfile::Builder::new();
        let prefix = format!(".{stem}.");
        builder.prefix(&prefix).suffix(".tmp");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o644));
        }
        let temp = builder.tempfile_in(dir)?.into_temp_path();

        Ok(Self {
            temp,
            dest: dest.to_path_buf(),
        })
    }

    /// Path the engine should write to.
    pub fn path(&self) -> &Path {
        &self.temp
    }

    pub fn destination(&self) -> &Path {
        &self.dest
    }

    /// Truncate leftovers from a previous attempt.
    ///
    /// # Errors
    /// Propagates I/O errors.
    pub fn reset(&self) -> io::Result<()> {
        fs::File::create(&self.temp).map(drop)
    }

    /// # Errors
    /// Returns [`EngineError::EmptyOutput`] if nothing was written.
    pub fn ensure_written(&self) -> Result<(), EngineError> {
        let len = fs::metadata(&self.temp)?.len();
        if len == 0 {
            return Err(EngineError::EmptyOutput(self.dest.clone()));
        }
        Ok(())
    }

    /// Atomically move the staged file onto the destination, replacing any
    /// previous artifact.
    ///
    /// # Errors
    /// Propagates the rename error; the temp file is removed in that case.
    pub fn commit(self) -> io::Result<PathBuf> {
        self.temp.persist(&self.dest).map_err(|err| err.error)?;
        Ok(self.dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_commit_moves_content_to_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("diagram1");
        let staged = StagedArtifact::new(&dest).unwrap();
        fs::write(staged.path(), "<svg/>").unwrap();
        staged.ensure_written().unwrap();
        let committed = staged.commit().unwrap();
        assert_eq!(committed, dest);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "<svg/>");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1, "temp file should be gone");
    }

    #[test]
    fn test_dropped_stage_leaves_nothing() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("diagram1");
        {
            let staged = StagedArtifact::new(&dest).unwrap();
            fs::write(staged.path(), "partial").unwrap();
        }
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_output_is_an_attempt_error() {
        let dir = tempdir().unwrap();
        let staged = StagedArtifact::new(&dir.path().join("d")).unwrap();
        assert!(matches!(staged.ensure_written(), Err(EngineError::EmptyOutput(_))));
    }

    #[test]
    fn test_reset_truncates_previous_attempt() {
        let dir = tempdir().unwrap();
        let staged = StagedArtifact::new(&dir.path().join("d")).unwrap();
        fs::write(staged.path(), "stale").unwrap();
        staged.reset().unwrap();
        assert_eq!(fs::metadata(staged.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_commit_replaces_existing_artifact() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("d");
        fs::write(&dest, "old").unwrap();
        let staged = StagedArtifact::new(&dest).unwrap();
        fs::write(staged.path(), "new").unwrap();
        staged.commit().unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempdir().unwrap();
        assert!(StagedArtifact::new(&dir.path().join("missing").join("d")).is_err());
    }
}
