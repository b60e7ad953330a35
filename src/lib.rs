//! Tapedeck - Record HTTP interactions to cassettes and replay them in tests
//!
//! A [`Cassette`] holds recorded request/response pairs. Depending on its
//! [`RecordMode`] it answers matching requests from storage, lets unmatched
//! requests through to the real network and records them, or refuses them.
//! Client adapters plug in through the [`Transport`] trait.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod cassette;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod matchers;
pub mod model;
pub mod persister;
pub mod serializer;
pub mod transport;
pub mod vcr;

pub use cassette::{Cassette, CassetteBuilder, RecordMode, RequestFilters};
pub use config::{FailurePolicy, FiltersConfig, PersisterKind, VcrConfig};
pub use error::{Result, TapedeckError};
pub use matchers::{MatchPredicate, Matcher, MatcherRegistry, DEFAULT_MATCH_ON};
pub use model::{Headers, Interaction, Request, Response, Status};
pub use persister::{DirectoryPersister, FilesystemPersister, MemoryPersister, Persister};
pub use serializer::{serializer_for, JsonSerializer, Serializer, YamlSerializer};
pub use transport::{CassetteTransport, Transport};
pub use vcr::Vcr;
