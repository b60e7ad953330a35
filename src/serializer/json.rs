//! JSON cassette serializer

use super::{CassetteData, Serializer};
use crate::{Result, TapedeckError};

/// Pretty-printed JSON documents
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extension(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, data: &CassetteData) -> Result<String> {
        serde_json::to_string_pretty(data)
            .map_err(|e| TapedeckError::Other(format!("Failed to render JSON cassette: {e}")))
    }

    fn deserialize(&self, text: &str) -> Result<CassetteData> {
        let data: CassetteData = serde_json::from_str(text)
            .map_err(|e| TapedeckError::Format(format!("Failed to parse JSON cassette: {e}")))?;
        data.validate()?;
        Ok(data)
    }
}
