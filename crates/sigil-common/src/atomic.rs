//! Atomic file replacement
//!
//! Every settings, specification and vault file is written through
//! [`StagedFile`]: content goes to a temporary file in the target's own
//! directory and is renamed over the target only on [`StagedFile::commit`].
//! Readers therefore observe either the old file or the new one, never a
//! truncated mix. Dropping a staged file without committing removes the
//! temporary and leaves the target untouched.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// A pending replacement of `target`
pub struct StagedFile {
    target: PathBuf,
    temp: NamedTempFile,
}

impl StagedFile {
    /// Stage a replacement for `target`, creating parent directories as needed
    pub fn create<P: AsRef<Path>>(target: P) -> io::Result<Self> {
        let target = target.as_ref().to_path_buf();
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        // Same directory as the target so the final rename never crosses filesystems
        let temp = tempfile::Builder::new()
            .prefix(".sigil-")
            .suffix(".tmp")
            .tempfile_in(&parent)?;

        Ok(Self { target, temp })
    }

    /// Path of the file this stage will replace
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Path of the temporary file holding staged content
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Append bytes to the staged content
    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.temp.write_all(bytes)
    }

    /// Flush, sync and rename the staged content over the target
    pub fn commit(mut self) -> io::Result<()> {
        self.temp.flush()?;
        self.temp.as_file().sync_all()?;
        self.temp.persist(&self.target).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Replace `path` with `contents` atomically
pub fn write_atomic<P: AsRef<Path>>(path: P, contents: &[u8]) -> io::Result<()> {
    let mut staged = StagedFile::create(path)?;
    staged.write_all(contents)?;
    staged.commit()
}
