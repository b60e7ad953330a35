//! Cassette serialization
//!
//! The persisted document holds two index-aligned sequences, `requests` and
//! `responses`. Bodies are stored as UTF-8 text under `string` when possible
//! and as base64 under `base64_string` otherwise, so any byte sequence
//! survives a round trip through a text format.

mod json;
mod yaml;

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::model::{Headers, Interaction, Request, Response, Status};
use crate::{Result, TapedeckError};

pub use json::JsonSerializer;
pub use yaml::YamlSerializer;

/// Current document format version
pub const FORMAT_VERSION: u32 = 1;

/// Converts cassette documents to and from text
pub trait Serializer: Send + Sync {
    /// Registry name (e.g. "yaml")
    fn name(&self) -> &'static str;

    /// File extension used by filesystem persisters, without the dot
    fn extension(&self) -> &'static str;

    /// Render a document as text
    ///
    /// # Errors
    ///
    /// Returns error if the document cannot be rendered
    fn serialize(&self, data: &CassetteData) -> Result<String>;

    /// Parse text into a validated document
    ///
    /// # Errors
    ///
    /// Returns [`TapedeckError::Format`] if the text is not a valid document
    fn deserialize(&self, text: &str) -> Result<CassetteData>;
}

/// Resolve a serializer by registry name
///
/// # Errors
///
/// Returns error if no serializer has that name
pub fn serializer_for(name: &str) -> Result<Arc<dyn Serializer>> {
    match name {
        "yaml" | "yml" => Ok(Arc::new(YamlSerializer)),
        "json" => Ok(Arc::new(JsonSerializer)),
        other => Err(TapedeckError::UnknownSerializer(other.to_string())),
    }
}

/// Persisted shape of a cassette
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CassetteData {
    /// Document format version
    #[serde(default = "format_version")]
    pub version: u32,
    /// Recorded requests, in recording order
    #[serde(default)]
    pub requests: Vec<RequestEntry>,
    /// Recorded responses; `responses[i]` answers `requests[i]`
    #[serde(default)]
    pub responses: Vec<ResponseEntry>,
}

fn format_version() -> u32 {
    FORMAT_VERSION
}

impl Default for CassetteData {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            requests: Vec::new(),
            responses: Vec::new(),
        }
    }
}

impl CassetteData {
    /// Build a document from interactions, keeping their order
    #[must_use]
    pub fn from_interactions<'a, I>(interactions: I) -> Self
    where
        I: IntoIterator<Item = &'a Interaction>,
    {
        let mut data = Self::default();
        for interaction in interactions {
            data.requests.push(RequestEntry::from(&interaction.request));
            data.responses.push(ResponseEntry::from(&interaction.response));
        }
        data
    }

    /// Number of request/response pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the document holds no pairs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Append every pair of `other` after this document's pairs
    pub fn extend(&mut self, other: Self) {
        self.requests.extend(other.requests);
        self.responses.extend(other.responses);
    }

    /// Check version and index alignment
    ///
    /// # Errors
    ///
    /// Returns [`TapedeckError::Format`] on an unsupported version or
    /// mismatched sequence lengths
    pub fn validate(&self) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(TapedeckError::Format(format!(
                "Unsupported version: {}, expected {FORMAT_VERSION}",
                self.version
            )));
        }

        if self.requests.len() != self.responses.len() {
            return Err(TapedeckError::Format(format!(
                "{} requests but {} responses",
                self.requests.len(),
                self.responses.len()
            )));
        }

        Ok(())
    }

    /// Convert into unplayed interactions
    ///
    /// # Errors
    ///
    /// Returns [`TapedeckError::Format`] if the document is misaligned or an
    /// entry cannot be decoded
    pub fn into_interactions(self) -> Result<Vec<Interaction>> {
        self.validate()?;

        self.requests
            .into_iter()
            .zip(self.responses)
            .enumerate()
            .map(|(index, (request, response))| {
                let request = request
                    .into_request()
                    .map_err(|e| TapedeckError::Format(format!("requests[{index}]: {e}")))?;
                let response = response
                    .into_response()
                    .map_err(|e| TapedeckError::Format(format!("responses[{index}]: {e}")))?;
                Ok(Interaction::new(request, response))
            })
            .collect()
    }
}

/// Persisted request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEntry {
    /// Uppercase method
    pub method: String,
    /// Normalized URL; `uri` is accepted when reading
    #[serde(alias = "uri")]
    pub url: String,
    /// Body, absent when the request had none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyEntry>,
    /// Headers, each mapped to a list of values
    #[serde(default)]
    pub headers: Headers,
}

impl From<&Request> for RequestEntry {
    fn from(request: &Request) -> Self {
        Self {
            method: request.method().to_string(),
            url: request.uri().to_string(),
            body: request.body().map(|body| BodyEntry::encode(body)),
            headers: request.headers().clone(),
        }
    }
}

impl RequestEntry {
    fn into_request(self) -> Result<Request> {
        let mut request = Request::new(&self.method, &self.url)?.with_headers(self.headers);
        if let Some(body) = self.body {
            request = request.with_body(body.decode()?);
        }
        Ok(request)
    }
}

/// Persisted status line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Status code
    pub code: u16,
    /// Reason phrase
    #[serde(default)]
    pub message: String,
}

/// Persisted response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEntry {
    /// Status line
    pub status: StatusEntry,
    /// Headers, each mapped to a list of values
    #[serde(default)]
    pub headers: Headers,
    /// Body
    #[serde(default)]
    pub body: BodyEntry,
    /// Originating URL
    #[serde(default)]
    pub url: String,
    /// Latency in fractional seconds
    #[serde(default)]
    pub latency: f64,
}

impl From<&Response> for ResponseEntry {
    fn from(response: &Response) -> Self {
        Self {
            status: StatusEntry {
                code: response.status.code,
                message: response.status.message.clone(),
            },
            headers: response.headers.clone(),
            body: BodyEntry::encode(&response.body),
            url: response.url.clone(),
            latency: response.latency.as_secs_f64(),
        }
    }
}

impl ResponseEntry {
    fn into_response(self) -> Result<Response> {
        Ok(Response {
            status: Status {
                code: self.status.code,
                message: self.status.message,
            },
            headers: self.headers,
            body: self.body.decode()?,
            url: self.url,
            latency: latency_from_secs(self.latency)?,
        })
    }
}

/// Persisted body: UTF-8 text or base64 for anything else
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyEntry {
    /// Body as text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
    /// Body as standard base64, used when the bytes are not UTF-8
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_string: Option<String>,
}

impl BodyEntry {
    /// Encode bytes, preferring plain text
    #[must_use]
    pub fn encode(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self {
                string: Some(text.to_string()),
                base64_string: None,
            },
            Err(_) => Self {
                string: None,
                base64_string: Some(STANDARD.encode(bytes)),
            },
        }
    }

    /// Decode back into bytes
    ///
    /// # Errors
    ///
    /// Returns [`TapedeckError::Format`] if both encodings are present or the
    /// base64 is invalid
    pub fn decode(self) -> Result<Bytes> {
        match (self.string, self.base64_string) {
            (Some(_), Some(_)) => Err(TapedeckError::Format(
                "body has both string and base64_string".to_string(),
            )),
            (Some(text), None) => Ok(Bytes::from(text)),
            (None, Some(encoded)) => STANDARD
                .decode(encoded.as_bytes())
                .map(Bytes::from)
                .map_err(|e| TapedeckError::Format(format!("invalid base64 body: {e}"))),
            (None, None) => Ok(Bytes::new()),
        }
    }
}

/// Convert stored fractional seconds, rounding to the nearest nanosecond
fn latency_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(TapedeckError::Format(format!("invalid latency: {secs}")));
    }

    let nanos = (secs * 1e9).round();
    if nanos >= u64::MAX as f64 {
        return Err(TapedeckError::Format(format!("latency out of range: {secs}")));
    }

    Ok(Duration::from_nanos(nanos as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_interactions() -> Vec<Interaction> {
        let get = Request::new("GET", "http://a.test/x")
            .unwrap()
            .with_header("Accept", "text/plain");
        let post = Request::new("POST", "http://b.test/y?q=1")
            .unwrap()
            .with_header("Content-Type", "application/octet-stream")
            .with_body(vec![0u8, 255, 254, 10]);

        vec![
            Interaction::new(
                get,
                Response::new(200, "OK")
                    .with_header("Set-Cookie", "a=1")
                    .with_header("Set-Cookie", "b=2")
                    .with_body("ok")
                    .with_url("http://a.test/x")
                    .with_latency(Duration::from_millis(125)),
            ),
            Interaction::new(
                post,
                Response::new(201, "Created")
                    .with_body(vec![0xC3u8, 0x28])
                    .with_url("http://b.test/y?q=1"),
            ),
        ]
    }

    fn assert_same(original: &[Interaction], decoded: &[Interaction]) {
        assert_eq!(original.len(), decoded.len());
        for (a, b) in original.iter().zip(decoded) {
            assert_eq!(a.request.method(), b.request.method());
            assert_eq!(a.request.uri(), b.request.uri());
            assert_eq!(a.request.body(), b.request.body());
            assert_eq!(a.request.headers(), b.request.headers());
            assert_eq!(a.response, b.response);
            assert!(!b.played);
        }
    }

    #[test]
    fn test_round_trip_all_serializers() {
        let interactions = sample_interactions();

        for name in ["yaml", "json"] {
            let serializer = serializer_for(name).unwrap();
            let text = serializer
                .serialize(&CassetteData::from_interactions(&interactions))
                .unwrap();
            let decoded = serializer
                .deserialize(&text)
                .unwrap()
                .into_interactions()
                .unwrap();

            assert_same(&interactions, &decoded);
        }
    }

    #[test]
    fn test_binary_body_uses_base64() {
        let entry = BodyEntry::encode(&[0xff, 0x00]);
        assert!(entry.string.is_none());
        assert_eq!(entry.base64_string.as_deref(), Some("/wA="));

        let text = BodyEntry::encode(b"hello");
        assert_eq!(text.string.as_deref(), Some("hello"));
    }

    #[test]
    fn test_misaligned_document_is_format_error() {
        let mut data = CassetteData::from_interactions(&sample_interactions());
        data.responses.pop();

        assert!(matches!(data.into_interactions(), Err(TapedeckError::Format(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let data = CassetteData {
            version: 7,
            ..CassetteData::default()
        };
        assert!(matches!(data.validate(), Err(TapedeckError::Format(_))));
    }

    #[test]
    fn test_invalid_latency() {
        assert!(latency_from_secs(-1.0).is_err());
        assert!(latency_from_secs(f64::NAN).is_err());
        assert_eq!(
            latency_from_secs(0.125).unwrap(),
            Duration::from_millis(125)
        );
    }

    #[test]
    fn test_body_with_both_encodings_rejected() {
        let entry = BodyEntry {
            string: Some("a".to_string()),
            base64_string: Some("YQ==".to_string()),
        };
        assert!(entry.decode().is_err());
    }

    #[test]
    fn test_unknown_serializer() {
        assert!(matches!(
            serializer_for("xml"),
            Err(TapedeckError::UnknownSerializer(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_pairs(
            bodies in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..8),
            latency_ms in 0u64..100_000,
        ) {
            let interactions: Vec<Interaction> = bodies
                .iter()
                .enumerate()
                .map(|(i, body)| {
                    let request = Request::new("PUT", &format!("http://a.test/item/{i}"))
                        .unwrap()
                        .with_body(body.clone());
                    let response = Response::new(200, "OK")
                        .with_body(body.clone())
                        .with_latency(Duration::from_millis(latency_ms));
                    Interaction::new(request, response)
                })
                .collect();

            let serializer = YamlSerializer;
            let text = serializer
                .serialize(&CassetteData::from_interactions(&interactions))
                .unwrap();
            let decoded = serializer
                .deserialize(&text)
                .unwrap()
                .into_interactions()
                .unwrap();

            prop_assert_eq!(decoded.len(), interactions.len());
            for (a, b) in interactions.iter().zip(&decoded) {
                prop_assert_eq!(a.request.uri(), b.request.uri());
                prop_assert_eq!(a.request.body(), b.request.body());
                prop_assert_eq!(&a.response, &b.response);
            }
        }
    }
}
