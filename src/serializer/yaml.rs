//! YAML cassette serializer

use super::{CassetteData, Serializer};
use crate::{Result, TapedeckError};

/// Human-readable YAML documents; the default format
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlSerializer;

impl Serializer for YamlSerializer {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn extension(&self) -> &'static str {
        "yaml"
    }

    fn serialize(&self, data: &CassetteData) -> Result<String> {
        serde_yaml::to_string(data)
            .map_err(|e| TapedeckError::Other(format!("Failed to render YAML cassette: {e}")))
    }

    fn deserialize(&self, text: &str) -> Result<CassetteData> {
        let data: CassetteData = serde_yaml::from_str(text)
            .map_err(|e| TapedeckError::Format(format!("Failed to parse YAML cassette: {e}")))?;
        data.validate()?;
        Ok(data)
    }
}
