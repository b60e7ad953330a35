//! Cassette library: builds cassettes from shared configuration
//!
//! A [`Vcr`] is an ordinary value. There is no process-wide "current
//! cassette"; each test asks for its own cassette by name and passes it to
//! the code under test.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::cassette::{Cassette, CassetteBuilder, RequestFilters};
use crate::config::{PersisterKind, VcrConfig};
use crate::matchers::{Matcher, MatcherRegistry};
use crate::persister::{DirectoryPersister, FilesystemPersister, Persister};
use crate::serializer::{serializer_for, Serializer};
use crate::transport::{CassetteTransport, Transport};
use crate::{Result, TapedeckError};

/// Maximum cassette name length
pub const MAX_NAME_LEN: usize = 255;

/// Factory for cassettes sharing one configuration
pub struct Vcr {
    config: VcrConfig,
    matchers: MatcherRegistry,
    filters: RequestFilters,
    serializer: Arc<dyn Serializer>,
    persister: Arc<dyn Persister>,
}

impl Vcr {
    /// Create a library from validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: VcrConfig) -> Result<Self> {
        config.validate()?;

        let serializer = serializer_for(&config.serializer)?;
        let persister: Arc<dyn Persister> = match config.persister {
            PersisterKind::File => Arc::new(FilesystemPersister),
            PersisterKind::Directory => Arc::new(DirectoryPersister),
        };
        let filters = RequestFilters::from_config(&config.filters);

        Ok(Self {
            config,
            matchers: MatcherRegistry::new(),
            filters,
            serializer,
            persister,
        })
    }

    /// Create a library from a TOML configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::new(VcrConfig::from_file(path)?)
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &VcrConfig {
        &self.config
    }

    /// Register a custom matcher usable in `match_on`
    pub fn register_matcher(&mut self, name: impl Into<String>, matcher: impl Matcher + 'static) {
        self.matchers.register(name, matcher);
    }

    /// Filters applied to every cassette, for adding predicates
    pub fn filters_mut(&mut self) -> &mut RequestFilters {
        &mut self.filters
    }

    /// Use a custom serializer instead of the configured one
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Use a custom storage backend instead of the configured one
    #[must_use]
    pub fn with_persister(mut self, persister: Arc<dyn Persister>) -> Self {
        self.persister = persister;
        self
    }

    /// Storage path for a cassette name
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid
    pub fn cassette_path(&self, name: &str) -> Result<PathBuf> {
        validate_cassette_name(name)?;

        let path = match self.config.persister {
            PersisterKind::File => self
                .config
                .cassette_dir
                .join(format!("{name}.{}", self.serializer.extension())),
            PersisterKind::Directory => self.config.cassette_dir.join(name),
        };
        Ok(path)
    }

    /// Builder preloaded with this library's settings
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid or not valid UTF-8 as a path
    pub fn builder(&self, name: &str) -> Result<CassetteBuilder> {
        let path = self.cassette_path(name)?;
        let id = path
            .to_str()
            .ok_or_else(|| TapedeckError::InvalidCassetteName(path.display().to_string()))?;

        debug!("Building cassette '{}' at {}", name, id);

        Ok(Cassette::builder(id)
            .record_mode(self.config.record_mode)
            .match_on(self.config.match_on.iter().cloned())
            .matchers(self.matchers.clone())
            .filters(self.filters.clone())
            .serializer(Arc::clone(&self.serializer))
            .persister(Arc::clone(&self.persister))
            .allow_playback_repeats(self.config.allow_playback_repeats))
    }

    /// Load the named cassette with this library's settings
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid or the cassette cannot be loaded
    pub fn use_cassette(&self, name: &str) -> Result<Cassette> {
        self.builder(name)?.load()
    }

    /// Load the named cassette and wrap `inner` with it
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid or the cassette cannot be loaded
    pub fn transport<T: Transport>(&self, name: &str, inner: T) -> Result<CassetteTransport<T>> {
        let cassette = self.use_cassette(name)?;
        Ok(CassetteTransport::new(cassette, inner).with_failure_policy(self.config.failure_policy))
    }
}

impl std::fmt::Debug for Vcr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vcr")
            .field("config", &self.config)
            .field("matchers", &self.matchers)
            .field("filters", &self.filters)
            .field("serializer", &self.serializer.name())
            .finish_non_exhaustive()
    }
}

/// Validate a cassette name
///
/// # Errors
///
/// Returns error if cassette name is invalid
fn validate_cassette_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(TapedeckError::InvalidCassetteName(format!(
            "Cassette name too long: {} > {MAX_NAME_LEN}",
            name.len()
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot contain path separators".to_string(),
        ));
    }

    if name.starts_with('.') {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot start with dot".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot contain null bytes".to_string(),
        ));
    }

    Ok(())
}
