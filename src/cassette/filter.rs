//! Request filters: which requests may be recorded, and what is scrubbed first

use std::fmt;
use std::sync::Arc;

use crate::config::FiltersConfig;
use crate::model::Request;

const LOCALHOST_NAMES: [&str; 4] = ["localhost", "127.0.0.1", "[::1]", "0.0.0.0"];

type Predicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Exclusion predicates and redaction rules applied before recording
///
/// An excluded request is never recorded or played back; the caller still
/// performs the real call. Redaction strips headers and query parameters
/// from requests before they are stored or matched, so secrets never reach
/// the cassette.
#[derive(Clone, Default)]
pub struct RequestFilters {
    ignore_hosts: Vec<String>,
    ignore_localhost: bool,
    filter_headers: Vec<String>,
    filter_query_parameters: Vec<String>,
    ignore_when: Vec<Predicate>,
}

impl RequestFilters {
    /// No exclusions, no redaction
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build filters from configuration
    #[must_use]
    pub fn from_config(config: &FiltersConfig) -> Self {
        let mut filters = Self::new().ignore_localhost(config.ignore_localhost);
        for host in &config.ignore_hosts {
            filters = filters.ignore_host(host);
        }
        for name in &config.filter_headers {
            filters = filters.filter_header(name);
        }
        for name in &config.filter_query_parameters {
            filters = filters.filter_query_parameter(name);
        }
        filters
    }

    /// Never record requests to `host`
    #[must_use]
    pub fn ignore_host(mut self, host: impl Into<String>) -> Self {
        self.ignore_hosts.push(host.into().to_ascii_lowercase());
        self
    }

    /// Never record requests to the local machine
    #[must_use]
    pub fn ignore_localhost(mut self, ignore: bool) -> Self {
        self.ignore_localhost = ignore;
        self
    }

    /// Strip a header before recording and matching
    #[must_use]
    pub fn filter_header(mut self, name: impl Into<String>) -> Self {
        self.filter_headers.push(name.into());
        self
    }

    /// Strip a query parameter before recording and matching
    #[must_use]
    pub fn filter_query_parameter(mut self, name: impl Into<String>) -> Self {
        self.filter_query_parameters.push(name.into());
        self
    }

    /// Never record requests for which `predicate` returns true
    #[must_use]
    pub fn ignore_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.ignore_when.push(Arc::new(predicate));
        self
    }

    /// Whether `request` is eligible for recording and playback
    #[must_use]
    pub fn allows(&self, request: &Request) -> bool {
        let host = request.host().to_ascii_lowercase();

        if self.ignore_localhost && LOCALHOST_NAMES.contains(&host.as_str()) {
            return false;
        }

        if self.ignore_hosts.iter().any(|ignored| *ignored == host) {
            return false;
        }

        !self.ignore_when.iter().any(|predicate| predicate(request))
    }

    /// Copy of `request` with filtered headers and query parameters removed
    #[must_use]
    pub fn redact(&self, request: &Request) -> Request {
        request
            .without_headers(&self.filter_headers)
            .without_query_parameters(&self.filter_query_parameters)
    }
}

impl fmt::Debug for RequestFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFilters")
            .field("ignore_hosts", &self.ignore_hosts)
            .field("ignore_localhost", &self.ignore_localhost)
            .field("filter_headers", &self.filter_headers)
            .field("filter_query_parameters", &self.filter_query_parameters)
            .field("ignore_when", &self.ignore_when.len())
            .finish()
    }
}
