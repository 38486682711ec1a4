//! File-backed implementation of [`StateBackend`].
//!
//! Persists each stream's state as a pretty-printed JSON document under a
//! configurable directory. Writes go through a temp file and atomic rename
//! so a crash mid-write never leaves a truncated blob behind.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use siphon_types::state::{StreamKind, StreamState};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// File-backed state storage, one JSON document per stream.
///
/// Create with [`FileBackend::open`] providing the state directory.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Open a state directory, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created.
    pub fn open(dir: &Path) -> error::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Resolve the state file path for a stream.
    ///
    /// Stream names are sanitized so they can't escape the state directory.
    fn path_for(&self, stream: &StreamKind) -> PathBuf {
        let safe: String = stream
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl StateBackend for FileBackend {
    fn load(&self, stream: &StreamKind) -> error::Result<Option<StreamState>> {
        let path = self.path_for(stream);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::Io(e)),
        };
        let state = serde_json::from_slice(&bytes)?;
        Ok(Some(state))
    }

    fn store(&self, stream: &StreamKind, state: &StreamState) -> error::Result<()> {
        let path = self.path_for(stream);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, stream: &StreamKind) -> error::Result<()> {
        match fs::remove_file(self.path_for(stream)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::Io(e)),
        }
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}
