//! Cassette engine: matching, playback bookkeeping and persistence

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::fingerprint::{fingerprint_request, short_hex};
use crate::matchers::{MatchPredicate, MatcherRegistry, DEFAULT_MATCH_ON};
use crate::model::{Interaction, Request, Response};
use crate::persister::{FilesystemPersister, Persister};
use crate::serializer::{CassetteData, Serializer, YamlSerializer};
use crate::{Result, TapedeckError};

use super::{RecordMode, RequestFilters};

/// Mutable cassette state, guarded as one unit
#[derive(Debug, Default)]
struct CassetteState {
    interactions: Vec<Interaction>,
    dirty: bool,
}

/// An ordered collection of recorded interactions and its record mode
///
/// All bookkeeping goes through an internal lock, so one cassette can serve
/// concurrent requests. The lock is never held while a real call is made:
/// callers decide with [`Cassette::try_play_response`], perform the call
/// without holding anything, then report back with [`Cassette::append`].
pub struct Cassette {
    id: String,
    record_mode: RecordMode,
    predicate: MatchPredicate,
    filters: RequestFilters,
    serializer: Arc<dyn Serializer>,
    persister: Arc<dyn Persister>,
    allow_playback_repeats: bool,
    existed: bool,
    state: Mutex<CassetteState>,
}

impl Cassette {
    /// Start configuring a cassette stored under `id`
    #[must_use]
    pub fn builder(id: impl Into<String>) -> CassetteBuilder {
        CassetteBuilder::new(id)
    }

    /// Storage identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Active record mode
    #[must_use]
    pub fn record_mode(&self) -> RecordMode {
        self.record_mode
    }

    /// Whether stored data existed when the cassette was loaded
    #[must_use]
    pub fn existed(&self) -> bool {
        self.existed
    }

    /// Whether an unmatched request must fail instead of reaching the network
    #[must_use]
    pub fn write_protected(&self) -> bool {
        match self.record_mode {
            RecordMode::None => true,
            RecordMode::Once => self.existed,
            RecordMode::NewEpisodes | RecordMode::All => false,
        }
    }

    /// Whether `request` is eligible for recording and playback at all
    #[must_use]
    pub fn filter_request(&self, request: &Request) -> bool {
        self.filters.allows(request)
    }

    /// Whether a stored interaction can answer `request` right now
    ///
    /// A cassette that started without stored data, or one in `all` mode,
    /// never plays back.
    ///
    /// Another thread may consume the interaction before a following
    /// [`play_response`](Self::play_response); use
    /// [`try_play_response`](Self::try_play_response) to check and play as
    /// one step.
    #[must_use]
    pub fn can_play_response_for(&self, request: &Request) -> bool {
        let state = self.lock();
        self.find_playable(&state.interactions, request).is_some()
    }

    /// Play the first matching interaction, marking it played
    ///
    /// # Errors
    ///
    /// Returns [`TapedeckError::NoMatch`] if no interaction is playable
    pub fn play_response(&self, request: &Request) -> Result<Response> {
        self.try_play_response(request)
            .ok_or_else(|| TapedeckError::NoMatch {
                method: request.method().to_string(),
                uri: request.uri().to_string(),
                cassette: self.id.clone(),
            })
    }

    /// Find and play a matching interaction in one critical section
    ///
    /// Returns a copy of the stored response, or `None` on a miss.
    pub fn try_play_response(&self, request: &Request) -> Option<Response> {
        let mut state = self.lock();
        let index = self.find_playable(&state.interactions, request)?;

        let interaction = &mut state.interactions[index];
        interaction.played = true;

        debug!(
            "Playing {} from {} (interaction {}, hash: {})",
            request,
            self.id,
            index,
            short_hex(&fingerprint_request(request))
        );

        Some(interaction.response.clone())
    }

    /// Record a new interaction
    ///
    /// Requests rejected by [`filter_request`](Self::filter_request) are
    /// dropped. Filtered headers and query parameters are removed before
    /// storing. Identical requests are never merged. Returns whether the
    /// interaction was stored.
    pub fn append(&self, request: Request, response: Response) -> bool {
        if !self.filter_request(&request) {
            debug!("Not recording filtered request {}", request);
            return false;
        }

        let request = self.filters.redact(&request);
        let mut state = self.lock();
        state.interactions.push(Interaction::new(request, response));
        state.dirty = true;

        debug!(
            "Recorded interaction {} into {}",
            state.interactions.len(),
            self.id
        );
        true
    }

    /// Persist the cassette if anything was appended since the last flush
    ///
    /// Returns whether storage was written.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or storage fails; the cassette stays
    /// dirty so the flush can be retried
    pub fn flush(&self) -> Result<bool> {
        let mut state = self.lock();
        if !state.dirty {
            debug!("Cassette {} unchanged, skipping write", self.id);
            return Ok(false);
        }

        let data = CassetteData::from_interactions(&state.interactions);
        self.persister
            .save_cassette(&self.id, &data, self.serializer.as_ref())?;
        state.dirty = false;

        info!(
            "Saved cassette {}: {} interactions",
            self.id,
            state.interactions.len()
        );
        Ok(true)
    }

    /// Whether interactions were appended since load or the last flush
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Number of interactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().interactions.len()
    }

    /// Whether the cassette holds no interactions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().interactions.is_empty()
    }

    /// Number of interactions played during this session
    #[must_use]
    pub fn play_count(&self) -> usize {
        self.lock()
            .interactions
            .iter()
            .filter(|interaction| interaction.played)
            .count()
    }

    /// Whether every interaction was played at least once
    #[must_use]
    pub fn all_played(&self) -> bool {
        self.lock()
            .interactions
            .iter()
            .all(|interaction| interaction.played)
    }

    /// Requests whose recordings were never played, in recording order
    #[must_use]
    pub fn unplayed_requests(&self) -> Vec<Request> {
        self.lock()
            .interactions
            .iter()
            .filter(|interaction| !interaction.played)
            .map(|interaction| interaction.request.clone())
            .collect()
    }

    /// Snapshot of all interactions
    #[must_use]
    pub fn interactions(&self) -> Vec<Interaction> {
        self.lock().interactions.clone()
    }

    /// Matchers that reject `request` for each recorded interaction
    ///
    /// Useful when explaining why a request did not match.
    #[must_use]
    pub fn match_failures(&self, request: &Request) -> Vec<(usize, Vec<String>)> {
        let incoming = self.filters.redact(request);
        self.lock()
            .interactions
            .iter()
            .enumerate()
            .map(|(index, interaction)| {
                let failing = self
                    .predicate
                    .failing(&interaction.request, &incoming)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                (index, failing)
            })
            .collect()
    }

    fn find_playable(&self, interactions: &[Interaction], request: &Request) -> Option<usize> {
        // A cassette that started without stored data records every request
        if !self.existed || self.record_mode == RecordMode::All || !self.filter_request(request) {
            return None;
        }

        let incoming = self.filters.redact(request);
        interactions.iter().position(|interaction| {
            (self.allow_playback_repeats || !interaction.played)
                && self.predicate.matches(&interaction.request, &incoming)
        })
    }

    fn lock(&self) -> MutexGuard<'_, CassetteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Cassette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cassette")
            .field("id", &self.id)
            .field("record_mode", &self.record_mode)
            .field("predicate", &self.predicate)
            .field("filters", &self.filters)
            .field("serializer", &self.serializer.name())
            .field("existed", &self.existed)
            .field("interactions", &self.len())
            .finish_non_exhaustive()
    }
}

/// Configures and loads a [`Cassette`]
pub struct CassetteBuilder {
    id: String,
    record_mode: RecordMode,
    match_on: Vec<String>,
    matchers: MatcherRegistry,
    filters: RequestFilters,
    serializer: Arc<dyn Serializer>,
    persister: Arc<dyn Persister>,
    allow_playback_repeats: bool,
}

impl CassetteBuilder {
    /// Defaults: `once` mode, default matchers, YAML in a single file
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            record_mode: RecordMode::default(),
            match_on: DEFAULT_MATCH_ON.iter().map(ToString::to_string).collect(),
            matchers: MatcherRegistry::new(),
            filters: RequestFilters::new(),
            serializer: Arc::new(YamlSerializer),
            persister: Arc::new(FilesystemPersister),
            allow_playback_repeats: false,
        }
    }

    /// Set the record mode
    #[must_use]
    pub fn record_mode(mut self, record_mode: RecordMode) -> Self {
        self.record_mode = record_mode;
        self
    }

    /// Set the ordered list of matcher names
    #[must_use]
    pub fn match_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.match_on = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the registry used to resolve matcher names
    #[must_use]
    pub fn matchers(mut self, matchers: MatcherRegistry) -> Self {
        self.matchers = matchers;
        self
    }

    /// Set request filters
    #[must_use]
    pub fn filters(mut self, filters: RequestFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Set the serializer
    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Set the storage backend
    #[must_use]
    pub fn persister(mut self, persister: Arc<dyn Persister>) -> Self {
        self.persister = persister;
        self
    }

    /// Allow already played interactions to match again
    #[must_use]
    pub fn allow_playback_repeats(mut self, allow: bool) -> Self {
        self.allow_playback_repeats = allow;
        self
    }

    /// Resolve matchers and load stored interactions
    ///
    /// Missing storage yields an empty cassette. In `all` mode stored
    /// interactions are not loaded; the session re-records from scratch.
    ///
    /// # Errors
    ///
    /// Returns error if a matcher name is unknown, or if storage exists but
    /// cannot be read or parsed
    pub fn load(self) -> Result<Cassette> {
        let predicate = self.matchers.predicate(self.match_on.as_slice())?;

        let (existed, interactions) = match self
            .persister
            .load_cassette(&self.id, self.serializer.as_ref())
        {
            Ok(data) => (true, data.into_interactions()?),
            Err(e) if e.is_not_found() => (false, Vec::new()),
            Err(e) => return Err(e),
        };

        let interactions = if self.record_mode == RecordMode::All {
            Vec::new()
        } else {
            interactions
        };

        info!(
            "Loaded cassette {}: {} interactions (mode: {}, existed: {})",
            self.id,
            interactions.len(),
            self.record_mode,
            existed
        );

        Ok(Cassette {
            id: self.id,
            record_mode: self.record_mode,
            predicate,
            filters: self.filters,
            serializer: self.serializer,
            persister: self.persister,
            allow_playback_repeats: self.allow_playback_repeats,
            existed,
            state: Mutex::new(CassetteState {
                interactions,
                dirty: false,
            }),
        })
    }
}
