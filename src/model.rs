//! Request/response model for recorded interactions
//!
//! Requests are normalized on construction (uppercase method, parsed URL) and
//! expose typed accessors for matchers. [`Request`] has no `PartialEq`;
//! equality is whatever the active matchers say.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::{Result, TapedeckError};

/// Status code used for responses synthesized instead of a real call
pub const SYNTHESIZED_STATUS: u16 = 599;

/// Ordered, case-insensitive, multi-valued header map
///
/// The first spelling of a header name is kept; later values with a name that
/// differs only in case are appended to the same entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Create an empty header map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a header map from name/value pairs, keeping their order
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.append(name, value);
        }
        headers
    }

    /// Append a value, merging with an existing entry of the same name
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => self.entries[index].1.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// First value for a header
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// All values for a header, empty if absent
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.position(name)
            .map_or(&[][..], |index| self.entries[index].1.as_slice())
    }

    /// Whether a header is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove a header and all its values
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name)
            .map(|index| self.entries.remove(index).1)
    }

    /// Iterate over `(name, values)` in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Number of distinct header names
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }
}

impl Serialize for Headers {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

/// Stored header values may be a single string or a list
#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

struct HeadersVisitor;

impl<'de> Visitor<'de> for HeadersVisitor {
    type Value = Headers;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a map of header names to values")
    }

    fn visit_map<A>(self, mut access: A) -> std::result::Result<Headers, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut headers = Headers::new();
        while let Some((name, values)) = access.next_entry::<String, HeaderValues>()? {
            match values {
                HeaderValues::One(value) => headers.append(name, value),
                HeaderValues::Many(values) => {
                    for value in values {
                        headers.append(name.as_str(), value);
                    }
                }
            }
        }
        Ok(headers)
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// An outgoing HTTP request, normalized on construction
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    url: Url,
    body: Option<Bytes>,
    headers: Headers,
}

impl Request {
    /// Create a request with no body and no headers
    ///
    /// # Errors
    ///
    /// Returns error if the URI cannot be parsed
    pub fn new(method: &str, uri: &str) -> Result<Self> {
        let url = Url::parse(uri.trim()).map_err(|e| TapedeckError::InvalidUrl {
            url: uri.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            method: method.trim().to_ascii_uppercase(),
            url,
            body: None,
            headers: Headers::new(),
        })
    }

    /// Attach a body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Append a header value
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace all headers
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Uppercase method
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Normalized URI
    #[must_use]
    pub fn uri(&self) -> &str {
        self.url.as_str()
    }

    /// Lowercase scheme
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host, empty when the URL has none
    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Explicit port, or the scheme's default
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    /// Path component
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Decoded query pairs, sorted so that parameter order is irrelevant
    #[must_use]
    pub fn query(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self.url.query_pairs().into_owned().collect();
        pairs.sort();
        pairs
    }

    /// Body, if one was supplied
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Body bytes, empty when absent
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    /// Body as UTF-8 text, if it is valid UTF-8
    #[must_use]
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(self.body_bytes()).ok()
    }

    /// Headers
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Media type from `Content-Type`, lowercased and without parameters
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        self.headers.get("content-type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Copy of this request with the named headers removed
    #[must_use]
    pub fn without_headers(&self, names: &[String]) -> Self {
        let mut request = self.clone();
        for name in names {
            request.headers.remove(name);
        }
        request
    }

    /// Copy of this request with the named query parameters removed
    ///
    /// The remaining parameters keep their original encoding and order.
    #[must_use]
    pub fn without_query_parameters(&self, names: &[String]) -> Self {
        let mut request = self.clone();
        let Some(raw) = self.url.query() else {
            return request;
        };

        let kept: Vec<&str> = raw
            .split('&')
            .filter(|segment| {
                !url::form_urlencoded::parse(segment.as_bytes())
                    .next()
                    .is_some_and(|(key, _)| names.iter().any(|name| *name == key))
            })
            .collect();

        if kept.len() == raw.split('&').count() {
            return request;
        }

        if kept.is_empty() {
            request.url.set_query(None);
        } else {
            request.url.set_query(Some(&kept.join("&")));
        }
        request
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Response status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Status code
    pub code: u16,
    /// Reason phrase
    pub message: String,
}

/// A recorded or replayed HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Status line
    pub status: Status,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Bytes,
    /// URL the response came from (may differ from the request after redirects)
    pub url: String,
    /// Observed latency, zero when unmeasured
    pub latency: Duration,
}

impl Response {
    /// Create a response with an empty body
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            status: Status {
                code,
                message: message.into(),
            },
            headers: Headers::new(),
            body: Bytes::new(),
            url: String::new(),
            latency: Duration::ZERO,
        }
    }

    /// Response standing in for a failed or refused real call
    #[must_use]
    pub fn synthesized(request: &Request, error: &TapedeckError) -> Self {
        Self::new(SYNTHESIZED_STATUS, "")
            .with_url(request.uri())
            .with_body(error.to_string())
    }

    /// Set the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Append a header value
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the originating URL
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the observed latency
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Body as UTF-8 text, if it is valid UTF-8
    #[must_use]
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// One recorded request/response pair
#[derive(Debug, Clone)]
pub struct Interaction {
    /// Recorded request
    pub request: Request,
    /// Recorded response
    pub response: Response,
    /// Whether the response was played back during this process
    pub played: bool,
}

impl Interaction {
    /// Create an unplayed interaction
    #[must_use]
    pub fn new(request: Request, response: Response) -> Self {
        Self {
            request,
            response,
            played: false,
        }
    }
}
