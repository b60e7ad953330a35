//! Directory cassette persister: one file per interaction pair
//!
//! Layout of a saved cassette:
//!
//! ```text
//! <id>/CURRENT             name of the live generation
//! <id>/gen-XXXX/000000-<fingerprint>.<ext>
//! <id>/gen-XXXX/000001-<fingerprint>.<ext>
//! ```
//!
//! A save writes a complete new generation beside the live one and then
//! replaces `CURRENT` atomically. Until that rename the previous generation
//! stays live, so an interrupted or failed save leaves the old cassette
//! loadable. A directory without `CURRENT` is read as a flat set of entry
//! files, which is convenient for hand-written cassettes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::{debug, warn};

use super::filesystem::write_atomic;
use super::{FilesystemPersister, Persister};
use crate::serializer::{CassetteData, Serializer};
use crate::{Result, TapedeckError};

/// File naming the live generation directory
const POINTER_FILE: &str = "CURRENT";

const GENERATION_PREFIX: &str = "gen-";

/// A concurrent save may retire the generation a load is about to read
const LOAD_ATTEMPTS: usize = 3;

/// Stores a cassette as a directory holding one document per interaction
///
/// Entry files are named `NNNNNN-<fingerprint>.<ext>` and loaded in name
/// order, so recording order survives the round trip. Files with other
/// extensions are ignored. An empty directory counts as no cassette.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryPersister;

impl DirectoryPersister {
    fn entry_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TapedeckError::NotFound(dir.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some(extension) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Generation named by the pointer file, `None` if there is no pointer
    fn current_generation(dir: &Path) -> Result<Option<String>> {
        let pointer = dir.join(POINTER_FILE);
        let name = match FilesystemPersister.load(&pointer) {
            Ok(name) => name,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let name = name.trim();
        if !name.starts_with(GENERATION_PREFIX) || name.contains(['/', '\\']) {
            return Err(TapedeckError::Format(format!(
                "{}: invalid generation name {name:?}",
                pointer.display()
            )));
        }
        Ok(Some(name.to_string()))
    }

    fn load_files(files: &[PathBuf], serializer: &dyn Serializer) -> Result<CassetteData> {
        let mut data = CassetteData::default();
        for path in files {
            let text = FilesystemPersister.load(path)?;
            let entry = serializer.deserialize(&text).map_err(|e| match e {
                TapedeckError::Format(reason) => {
                    TapedeckError::Format(format!("{}: {reason}", path.display()))
                }
                other => other,
            })?;
            data.extend(entry);
        }
        Ok(data)
    }

    /// Remove generations left behind by earlier saves, keeping `live`
    fn remove_stale_generations(dir: &Path, live: &str) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(GENERATION_PREFIX) && name != live {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!(
                        "Failed to remove stale generation {}: {}",
                        entry.path().display(),
                        e
                    );
                }
            }
        }
    }
}

impl Persister for DirectoryPersister {
    fn load_cassette(&self, id: &str, serializer: &dyn Serializer) -> Result<CassetteData> {
        let dir = Path::new(id);
        if dir.is_file() {
            return Err(TapedeckError::Format(format!(
                "{id}: expected a cassette directory, found a file"
            )));
        }

        for _ in 0..LOAD_ATTEMPTS {
            let Some(generation) = Self::current_generation(dir)? else {
                let files = Self::entry_files(dir, serializer.extension())?;
                if files.is_empty() {
                    return Err(TapedeckError::NotFound(id.to_string()));
                }
                return Self::load_files(&files, serializer);
            };

            match Self::entry_files(&dir.join(&generation), serializer.extension()) {
                Ok(files) => return Self::load_files(&files, serializer),
                Err(e) if e.is_not_found() => {
                    debug!("Generation {} of {} was replaced, rereading pointer", generation, id);
                }
                Err(e) => return Err(e),
            }
        }

        Err(TapedeckError::Format(format!(
            "{id}: {POINTER_FILE} names a missing generation"
        )))
    }

    fn save_cassette(
        &self,
        id: &str,
        data: &CassetteData,
        serializer: &dyn Serializer,
    ) -> Result<()> {
        data.validate()?;

        let dir = Path::new(id);
        fs::create_dir_all(dir)?;

        // Dropping the staging directory on any early return discards it
        let staging = Builder::new().prefix(".gen-").tempdir_in(dir)?;
        for (index, (request, response)) in data.requests.iter().zip(&data.responses).enumerate()
        {
            let single = CassetteData {
                requests: vec![request.clone()],
                responses: vec![response.clone()],
                ..CassetteData::default()
            };
            let file_name = format!(
                "{index:06}-{}.{}",
                entry_key(&request.method, &request.url),
                serializer.extension()
            );
            write_atomic(&staging.path().join(file_name), serializer.serialize(&single)?.as_bytes())?;
        }

        let generation = staging
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.trim_start_matches('.').to_string())
            .ok_or_else(|| {
                TapedeckError::Other(format!(
                    "Unusable staging directory {}",
                    staging.path().display()
                ))
            })?;
        let generation_dir = dir.join(&generation);
        fs::rename(staging.path(), &generation_dir)?;

        // Replacing the pointer is the commit point
        if let Err(e) = write_atomic(&dir.join(POINTER_FILE), generation.as_bytes()) {
            if let Err(cleanup) = fs::remove_dir_all(&generation_dir) {
                warn!(
                    "Failed to remove uncommitted generation {}: {}",
                    generation_dir.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        Self::remove_stale_generations(dir, &generation);

        debug!(
            "Saved {} interaction files to {} (generation {})",
            data.len(),
            id,
            generation
        );
        Ok(())
    }
}

/// Short stable key naming an interaction file
fn entry_key(method: &str, url: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_bytes());
    let hash: [u8; 32] = hasher.finalize().into();
    crate::fingerprint::short_hex(&hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Interaction, Request, Response};
    use crate::serializer::YamlSerializer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn data(count: usize) -> CassetteData {
        let interactions: Vec<Interaction> = (0..count)
            .map(|i| {
                Interaction::new(
                    Request::new("GET", &format!("http://a.test/{i}")).unwrap(),
                    Response::new(200, "OK").with_body(format!("body {i}")),
                )
            })
            .collect();
        CassetteData::from_interactions(&interactions)
    }

    fn names_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn live_generation(dir: &Path) -> PathBuf {
        dir.join(fs::read_to_string(dir.join(POINTER_FILE)).unwrap())
    }

    /// YAML serializer that fails once its budget of documents is spent
    struct FailingSerializer {
        remaining: AtomicUsize,
    }

    impl Serializer for FailingSerializer {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn extension(&self) -> &'static str {
            "yaml"
        }

        fn serialize(&self, data: &CassetteData) -> Result<String> {
            let left = self.remaining.load(Ordering::SeqCst);
            if left == 0 {
                return Err(TapedeckError::Other("disk full".to_string()));
            }
            self.remaining.store(left - 1, Ordering::SeqCst);
            YamlSerializer.serialize(data)
        }

        fn deserialize(&self, text: &str) -> Result<CassetteData> {
            YamlSerializer.deserialize(text)
        }
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let id = temp_dir.path().join("missing");

        let result = DirectoryPersister.load_cassette(id.to_str().unwrap(), &YamlSerializer);
        assert!(matches!(result, Err(TapedeckError::NotFound(_))));
    }

    #[test]
    fn test_empty_directory_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cassette");
        fs::create_dir_all(&dir).unwrap();

        let result = DirectoryPersister.load_cassette(dir.to_str().unwrap(), &YamlSerializer);
        assert!(matches!(result, Err(TapedeckError::NotFound(_))));
    }

    #[test]
    fn test_one_file_per_interaction_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cassette");
        let id = dir.to_str().unwrap();

        DirectoryPersister
            .save_cassette(id, &data(12), &YamlSerializer)
            .unwrap();

        assert_eq!(fs::read_dir(live_generation(&dir)).unwrap().count(), 12);

        let loaded = DirectoryPersister.load_cassette(id, &YamlSerializer).unwrap();
        assert_eq!(loaded, data(12));
    }

    #[test]
    fn test_resave_replaces_previous_generation() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cassette");
        let id = dir.to_str().unwrap();

        DirectoryPersister.save_cassette(id, &data(3), &YamlSerializer).unwrap();
        DirectoryPersister.save_cassette(id, &data(1), &YamlSerializer).unwrap();

        let loaded = DirectoryPersister.load_cassette(id, &YamlSerializer).unwrap();
        assert_eq!(loaded.len(), 1);

        let names = names_in(&dir);
        assert_eq!(names.len(), 2, "only the pointer and one generation remain: {names:?}");
        assert_eq!(names[0], POINTER_FILE);
        assert!(names[1].starts_with(GENERATION_PREFIX));
    }

    #[test]
    fn test_failed_save_keeps_previous_cassette() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cassette");
        let id = dir.to_str().unwrap();

        DirectoryPersister.save_cassette(id, &data(3), &YamlSerializer).unwrap();
        let before = names_in(&dir);

        let failing = FailingSerializer {
            remaining: AtomicUsize::new(2),
        };
        let result = DirectoryPersister.save_cassette(id, &data(5), &failing);
        assert!(matches!(result, Err(TapedeckError::Other(_))));

        let loaded = DirectoryPersister.load_cassette(id, &YamlSerializer).unwrap();
        assert_eq!(loaded, data(3));
        assert_eq!(names_in(&dir), before, "staging files must be discarded");
    }

    #[test]
    fn test_uncommitted_generation_is_ignored_then_cleaned() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cassette");
        let id = dir.to_str().unwrap();

        DirectoryPersister.save_cassette(id, &data(2), &YamlSerializer).unwrap();

        // A save interrupted before the pointer switch leaves a generation behind
        let orphan = dir.join("gen-orphan");
        fs::create_dir_all(&orphan).unwrap();
        fs::write(orphan.join("000000-x.yaml"), "requests: [").unwrap();

        let loaded = DirectoryPersister.load_cassette(id, &YamlSerializer).unwrap();
        assert_eq!(loaded.len(), 2);

        DirectoryPersister.save_cassette(id, &data(1), &YamlSerializer).unwrap();
        assert!(!orphan.exists());
    }

    #[test]
    fn test_pointer_to_missing_generation_is_format_error() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cassette");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(POINTER_FILE), "gen-gone").unwrap();

        let result = DirectoryPersister.load_cassette(dir.to_str().unwrap(), &YamlSerializer);
        assert!(matches!(result, Err(TapedeckError::Format(_))));
    }

    #[test]
    fn test_corrupt_entry_is_format_error() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cassette");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("000000-x.yaml"), "requests: [").unwrap();

        let result = DirectoryPersister.load_cassette(dir.to_str().unwrap(), &YamlSerializer);
        assert!(matches!(result, Err(TapedeckError::Format(_))));
    }

    #[test]
    fn test_non_utf8_entry_is_format_error() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cassette");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("000000-x.yaml"), [0xff, 0xfe, 0x00]).unwrap();

        let result = DirectoryPersister.load_cassette(dir.to_str().unwrap(), &YamlSerializer);
        assert!(matches!(result, Err(TapedeckError::Format(_))));
    }

    #[test]
    fn test_foreign_files_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cassette");
        let id = dir.to_str().unwrap();

        DirectoryPersister.save_cassette(id, &data(2), &YamlSerializer).unwrap();
        fs::write(live_generation(&dir).join("README.txt"), "notes").unwrap();

        let loaded = DirectoryPersister.load_cassette(id, &YamlSerializer).unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
