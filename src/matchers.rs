//! Matcher registry
//!
//! A matcher compares a recorded request with an incoming one. A cassette
//! combines an ordered list of named matchers into a [`MatchPredicate`] that
//! holds only when every matcher agrees.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::model::Request;
use crate::{Result, TapedeckError};

/// Matchers used when none are configured
pub const DEFAULT_MATCH_ON: [&str; 6] = ["method", "scheme", "host", "port", "path", "query"];

/// Pure comparison of a recorded request against an incoming request
pub trait Matcher: Send + Sync {
    /// Whether `incoming` should be answered by the interaction recorded for `recorded`
    fn matches(&self, recorded: &Request, incoming: &Request) -> bool;
}

impl<F> Matcher for F
where
    F: Fn(&Request, &Request) -> bool + Send + Sync,
{
    fn matches(&self, recorded: &Request, incoming: &Request) -> bool {
        self(recorded, incoming)
    }
}

/// Name-keyed collection of matchers
#[derive(Clone)]
pub struct MatcherRegistry {
    matchers: HashMap<String, Arc<dyn Matcher>>,
}

impl MatcherRegistry {
    /// Registry holding every built-in matcher
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("method", method);
        registry.register("scheme", scheme);
        registry.register("host", host);
        registry.register("port", port);
        registry.register("path", path);
        registry.register("query", query);
        registry.register("uri", uri);
        registry.register("body", body);
        registry.register("headers", headers_subset);
        registry.register("headers_exact", headers_exact);
        registry
    }

    /// Registry with no matchers
    #[must_use]
    pub fn empty() -> Self {
        Self {
            matchers: HashMap::new(),
        }
    }

    /// Register a matcher, replacing any existing one with the same name
    pub fn register(&mut self, name: impl Into<String>, matcher: impl Matcher + 'static) {
        self.matchers.insert(name.into(), Arc::new(matcher));
    }

    /// Look up a matcher by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Matcher>> {
        self.matchers.get(name).cloned()
    }

    /// Whether a matcher is registered under `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.matchers.contains_key(name)
    }

    /// Resolve an ordered list of names into a predicate
    ///
    /// # Errors
    ///
    /// Returns error if any name is not registered
    pub fn predicate<S: AsRef<str>>(&self, names: &[S]) -> Result<MatchPredicate> {
        let matchers = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.get(name)
                    .map(|matcher| (name.to_string(), matcher))
                    .ok_or_else(|| TapedeckError::UnknownMatcher(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MatchPredicate { matchers })
    }
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.matchers.keys().collect();
        names.sort();
        f.debug_struct("MatcherRegistry")
            .field("matchers", &names)
            .finish()
    }
}

/// Logical AND of an ordered list of matchers
#[derive(Clone)]
pub struct MatchPredicate {
    matchers: Vec<(String, Arc<dyn Matcher>)>,
}

impl MatchPredicate {
    /// Whether every matcher accepts the pair
    #[must_use]
    pub fn matches(&self, recorded: &Request, incoming: &Request) -> bool {
        self.matchers
            .iter()
            .all(|(_, matcher)| matcher.matches(recorded, incoming))
    }

    /// Names of the matchers that reject the pair
    #[must_use]
    pub fn failing(&self, recorded: &Request, incoming: &Request) -> Vec<&str> {
        self.matchers
            .iter()
            .filter(|(_, matcher)| !matcher.matches(recorded, incoming))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Matcher names in evaluation order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.matchers.iter().map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for MatchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Method, case-insensitive
pub fn method(recorded: &Request, incoming: &Request) -> bool {
    recorded.method().eq_ignore_ascii_case(incoming.method())
}

/// URL scheme
pub fn scheme(recorded: &Request, incoming: &Request) -> bool {
    recorded.scheme() == incoming.scheme()
}

/// Host name
pub fn host(recorded: &Request, incoming: &Request) -> bool {
    recorded.host() == incoming.host()
}

/// Port, with scheme defaults applied
pub fn port(recorded: &Request, incoming: &Request) -> bool {
    recorded.port() == incoming.port()
}

/// Path, exact
pub fn path(recorded: &Request, incoming: &Request) -> bool {
    recorded.path() == incoming.path()
}

/// Query parameters, order-independent
pub fn query(recorded: &Request, incoming: &Request) -> bool {
    recorded.query() == incoming.query()
}

/// Whole normalized URI
pub fn uri(recorded: &Request, incoming: &Request) -> bool {
    recorded.uri() == incoming.uri()
}

/// Body; structural for JSON and form bodies, byte-exact otherwise
pub fn body(recorded: &Request, incoming: &Request) -> bool {
    if recorded.body_bytes() == incoming.body_bytes() {
        return true;
    }

    let content_type = incoming.content_type().or_else(|| recorded.content_type());
    match content_type.as_deref() {
        Some(kind) if kind == "application/json" || kind.ends_with("+json") => {
            let parse = |request: &Request| {
                serde_json::from_slice::<serde_json::Value>(request.body_bytes()).ok()
            };
            matches!((parse(recorded), parse(incoming)), (Some(a), Some(b)) if a == b)
        }
        Some("application/x-www-form-urlencoded") => {
            let parse = |request: &Request| {
                let mut pairs: Vec<(String, String)> =
                    url::form_urlencoded::parse(request.body_bytes())
                        .into_owned()
                        .collect();
                pairs.sort();
                pairs
            };
            parse(recorded) == parse(incoming)
        }
        _ => false,
    }
}

/// Every recorded header is present in the incoming request with the same values
pub fn headers_subset(recorded: &Request, incoming: &Request) -> bool {
    recorded
        .headers()
        .iter()
        .all(|(name, values)| incoming.headers().get_all(name) == values)
}

/// Both requests carry exactly the same headers, ignoring name case and order
pub fn headers_exact(recorded: &Request, incoming: &Request) -> bool {
    recorded.headers().len() == incoming.headers().len() && headers_subset(recorded, incoming)
}
