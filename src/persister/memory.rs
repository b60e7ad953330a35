//! In-memory cassette persister

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use super::Persister;
use crate::serializer::{CassetteData, Serializer};
use crate::{Result, TapedeckError};

/// Keeps serialized cassettes in a map; useful for tests of the engine itself
#[derive(Debug, Default)]
pub struct MemoryPersister {
    documents: DashMap<String, String>,
    saves: AtomicUsize,
}

impl MemoryPersister {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document as raw text
    pub fn insert_text(&self, id: impl Into<String>, text: impl Into<String>) {
        self.documents.insert(id.into(), text.into());
    }

    /// Raw text stored under `id`
    #[must_use]
    pub fn text(&self, id: &str) -> Option<String> {
        self.documents.get(id).map(|entry| entry.value().clone())
    }

    /// Number of successful saves
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl Persister for MemoryPersister {
    fn load_cassette(&self, id: &str, serializer: &dyn Serializer) -> Result<CassetteData> {
        let text = self
            .text(id)
            .ok_or_else(|| TapedeckError::NotFound(id.to_string()))?;
        serializer.deserialize(&text)
    }

    fn save_cassette(
        &self,
        id: &str,
        data: &CassetteData,
        serializer: &dyn Serializer,
    ) -> Result<()> {
        let text = serializer.serialize(data)?;
        self.documents.insert(id.to_string(), text);
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonSerializer;

    #[test]
    fn test_missing_is_not_found() {
        let persister = MemoryPersister::new();
        let result = persister.load_cassette("nope", &JsonSerializer);
        assert!(matches!(result, Err(TapedeckError::NotFound(_))));
    }

    #[test]
    fn test_save_then_load() {
        let persister = MemoryPersister::new();
        persister
            .save_cassette("c", &CassetteData::default(), &JsonSerializer)
            .unwrap();

        assert_eq!(persister.save_count(), 1);
        assert!(persister.load_cassette("c", &JsonSerializer).unwrap().is_empty());
    }

    #[test]
    fn test_seeded_garbage_is_format_error() {
        let persister = MemoryPersister::new();
        persister.insert_text("c", "{not json");

        let result = persister.load_cassette("c", &JsonSerializer);
        assert!(matches!(result, Err(TapedeckError::Format(_))));
    }
}
