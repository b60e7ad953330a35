//! Single-file cassette persister

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use super::Persister;
use crate::serializer::{CassetteData, Serializer};
use crate::{Result, TapedeckError};

/// Stores each cassette as one file; the identifier is its path
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemPersister;

impl FilesystemPersister {
    /// Read the text stored at `path`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist, or an I/O error
    pub fn load(&self, path: &Path) -> Result<String> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TapedeckError::NotFound(path.display().to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(TapedeckError::Format(
                format!("{} is not valid UTF-8", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the file at `path` with `text`
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, path: &Path, text: &str) -> Result<()> {
        write_atomic(path, text.as_bytes())
    }
}

impl Persister for FilesystemPersister {
    fn load_cassette(&self, id: &str, serializer: &dyn Serializer) -> Result<CassetteData> {
        let text = self.load(Path::new(id))?;
        serializer.deserialize(&text).map_err(|e| match e {
            TapedeckError::Format(reason) => TapedeckError::Format(format!("{id}: {reason}")),
            other => other,
        })
    }

    fn save_cassette(
        &self,
        id: &str,
        data: &CassetteData,
        serializer: &dyn Serializer,
    ) -> Result<()> {
        let text = serializer.serialize(data)?;
        self.save(Path::new(id), &text)?;
        debug!("Saved {} interactions to {}", data.len(), id);
        Ok(())
    }
}

/// Write to a temporary file in the target directory, then rename over the target
pub(super) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    Ok(())
}
