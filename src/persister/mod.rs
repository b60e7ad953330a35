//! Cassette storage backends
//!
//! A persister moves serialized cassette documents in and out of storage.
//! Missing storage is reported as [`TapedeckError::NotFound`], which the
//! cassette treats as an empty recording; anything that exists but cannot be
//! parsed is a [`TapedeckError::Format`] and must propagate.
//!
//! [`TapedeckError::NotFound`]: crate::TapedeckError::NotFound
//! [`TapedeckError::Format`]: crate::TapedeckError::Format

mod directory;
mod filesystem;
mod memory;

pub use directory::DirectoryPersister;
pub use filesystem::FilesystemPersister;
pub use memory::MemoryPersister;

use crate::serializer::{CassetteData, Serializer};
use crate::Result;

/// Storage backend for cassette documents
pub trait Persister: Send + Sync {
    /// Load the document stored under `id`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing is stored under `id`, `Format` if the
    /// stored data cannot be parsed, or an I/O error
    fn load_cassette(&self, id: &str, serializer: &dyn Serializer) -> Result<CassetteData>;

    /// Store a document under `id`, replacing what was there
    ///
    /// A concurrent reader sees either the previous document or the new one,
    /// never a partial write.
    ///
    /// # Errors
    ///
    /// Returns error if the document cannot be rendered or written
    fn save_cassette(&self, id: &str, data: &CassetteData, serializer: &dyn Serializer)
        -> Result<()>;
}
