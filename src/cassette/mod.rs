//! Cassettes: recorded interactions plus the record-mode state machine

mod engine;
mod filter;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TapedeckError;

pub use engine::{Cassette, CassetteBuilder};
pub use filter::RequestFilters;

/// Policy deciding whether unmatched requests may be recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    /// Never record; an unmatched request is an error
    None,
    /// Record only into a cassette that did not exist yet
    #[default]
    Once,
    /// Play matches, record everything else
    NewEpisodes,
    /// Never play; record every request into a fresh cassette
    All,
}

impl RecordMode {
    /// Name as used in configuration files
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Once => "once",
            Self::NewEpisodes => "new_episodes",
            Self::All => "all",
        }
    }
}

impl fmt::Display for RecordMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordMode {
    type Err = TapedeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "once" => Ok(Self::Once),
            "new_episodes" => Ok(Self::NewEpisodes),
            "all" => Ok(Self::All),
            other => Err(TapedeckError::ConfigError(format!(
                "Unknown record mode: {other}"
            ))),
        }
    }
}
