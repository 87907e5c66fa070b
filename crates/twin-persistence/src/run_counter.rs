//! ---
//! twin_section: "05-persistence"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Monotonic run identifier stored in a plain-text file."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{PersistenceError, Result};

/// Single integer in a text file, incremented once per instantiation.
#[derive(Debug, Clone)]
pub struct RunCounter {
    path: PathBuf,
}

impl RunCounter {
    /// Counter stored at `path`. Nothing is touched until [`RunCounter::next`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Counter file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current stored value; a missing file reads as 0.
    pub fn current(&self) -> Result<u64> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    return Ok(0);
                }
                trimmed
                    .parse()
                    .map_err(|_| PersistenceError::CorruptCounter {
                        path: self.path.display().to_string(),
                        content: trimmed.to_owned(),
                    })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "run counter missing, starting from 0");
                Ok(0)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Increment, persist through a temporary file and atomic rename, return the new id.
    pub fn next(&self) -> Result<u64> {
        let next = self.current()? + 1;
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&directory)?;
        let mut staged = NamedTempFile::new_in(&directory)?;
        writeln!(staged, "{next}")?;
        staged.as_file().sync_all()?;
        staged
            .persist(&self.path)
            .map_err(|err| PersistenceError::Io(err.error))?;
        info!(path = %self.path.display(), run_id = next, "run counter advanced");
        Ok(next)
    }
}
