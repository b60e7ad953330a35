//! Transport seam between HTTP clients and a cassette
//!
//! Client adapters implement [`Transport`] for the real network call and wrap
//! it in a [`CassetteTransport`]. The wrapper decides before the call whether
//! the cassette can answer, and records after the call; cassette locks are
//! never held across the `.await`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::cassette::Cassette;
use crate::config::FailurePolicy;
use crate::fingerprint::{fingerprint_request, short_hex};
use crate::model::{Request, Response};
use crate::{Result, TapedeckError};

/// Performs a real HTTP call
pub trait Transport: Send + Sync {
    /// Send `request` over the network
    ///
    /// # Errors
    ///
    /// Returns error if the call fails
    fn send(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Answers requests from a cassette, falling back to a real transport
pub struct CassetteTransport<T> {
    cassette: Arc<Cassette>,
    inner: T,
    failure_policy: FailurePolicy,
}

impl<T: Transport> CassetteTransport<T> {
    /// Wrap `inner` with `cassette`
    #[must_use]
    pub fn new(cassette: Cassette, inner: T) -> Self {
        Self {
            cassette: Arc::new(cassette),
            inner,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Set how failures are reported to the caller
    #[must_use]
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// The cassette in use
    #[must_use]
    pub fn cassette(&self) -> &Arc<Cassette> {
        &self.cassette
    }

    /// The wrapped transport
    #[must_use]
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Play `request` from the cassette, or perform and record it
    ///
    /// # Errors
    ///
    /// Under [`FailurePolicy::Propagate`], returns
    /// [`TapedeckError::UnplayableRequest`] for an unmatched request on a
    /// write-protected cassette, or the transport's error if the real call
    /// fails. Under [`FailurePolicy::Synthesize`] both become a 599 response.
    pub async fn send(&self, request: Request) -> Result<Response> {
        if let Some(response) = self.cassette.try_play_response(&request) {
            return Ok(response);
        }

        let recordable = self.cassette.filter_request(&request);
        if recordable && self.cassette.write_protected() {
            let error = TapedeckError::UnplayableRequest {
                method: request.method().to_string(),
                uri: request.uri().to_string(),
                cassette: self.cassette.id().to_string(),
                mode: self.cassette.record_mode(),
            };
            warn!("{}", error);
            return self.fail(&request, error);
        }

        debug!(
            "Cache miss, performing real call: {} (hash: {})",
            request,
            short_hex(&fingerprint_request(&request))
        );

        let started = Instant::now();
        match self.inner.send(&request).await {
            Ok(response) => {
                let response = response.with_latency(started.elapsed());
                let response = if response.url.is_empty() {
                    response.with_url(request.uri())
                } else {
                    response
                };

                if recordable {
                    self.cassette.append(request, response.clone());
                }
                Ok(response)
            }
            Err(error) => self.fail(&request, error),
        }
    }

    /// Flush the cassette
    ///
    /// Returns whether storage was written.
    ///
    /// # Errors
    ///
    /// Returns error if the cassette cannot be saved
    pub fn finish(&self) -> Result<bool> {
        self.cassette.flush()
    }

    fn fail(&self, request: &Request, error: TapedeckError) -> Result<Response> {
        match self.failure_policy {
            FailurePolicy::Propagate => Err(error),
            FailurePolicy::Synthesize => {
                warn!("Synthesizing response for {}: {}", request, error);
                Ok(Response::synthesized(request, &error))
            }
        }
    }
}

impl<T> std::fmt::Debug for CassetteTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CassetteTransport")
            .field("cassette", &self.cassette)
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::{RecordMode, RequestFilters};
    use crate::model::SYNTHESIZED_STATUS;
    use crate::persister::MemoryPersister;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake network that answers every request with its path
    #[derive(Default)]
    struct EchoTransport {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Transport for EchoTransport {
        async fn send(&self, request: &Request) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                return Err(TapedeckError::Transport("connection refused".to_string()));
            }
            Ok(Response::new(200, "OK").with_body(request.path().to_string()))
        }
    }

    fn transport(mode: RecordMode, store: &Arc<MemoryPersister>) -> CassetteTransport<EchoTransport> {
        let cassette = Cassette::builder("transport")
            .record_mode(mode)
            .persister(store.clone())
            .filters(RequestFilters::new().ignore_localhost(true))
            .load()
            .unwrap();
        CassetteTransport::new(cassette, EchoTransport::default())
    }

    fn get(uri: &str) -> Request {
        Request::new("GET", uri).unwrap()
    }

    #[tokio::test]
    async fn test_records_then_replays() {
        let store = Arc::new(MemoryPersister::new());

        let recorder = transport(RecordMode::Once, &store);
        let response = recorder.send(get("http://b.test/y")).await.unwrap();
        assert_eq!(response.body_text(), Some("/y"));
        assert_eq!(response.url, "http://b.test/y");
        assert!(recorder.finish().unwrap());
        assert_eq!(recorder.inner().calls.load(Ordering::SeqCst), 1);

        let player = transport(RecordMode::Once, &store);
        let replayed = player.send(get("http://b.test/y")).await.unwrap();
        assert_eq!(replayed.body_text(), Some("/y"));
        assert_eq!(player.inner().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fresh_once_cassette_records_identical_requests_twice() {
        let store = Arc::new(MemoryPersister::new());
        let recorder = transport(RecordMode::Once, &store);

        recorder.send(get("http://a.test/n")).await.unwrap();
        recorder.send(get("http://a.test/n")).await.unwrap();

        assert_eq!(recorder.inner().calls.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.cassette().len(), 2);
    }

    #[tokio::test]
    async fn test_none_mode_refuses_unmatched() {
        let store = Arc::new(MemoryPersister::new());
        let player = transport(RecordMode::None, &store);

        let result = player.send(get("http://b.test/y")).await;
        match result {
            Err(TapedeckError::UnplayableRequest { method, uri, mode, .. }) => {
                assert_eq!(method, "GET");
                assert_eq!(uri, "http://b.test/y");
                assert_eq!(mode, RecordMode::None);
            }
            other => panic!("expected UnplayableRequest, got {other:?}"),
        }
        assert_eq!(player.inner().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_synthesize_policy_for_unplayable() {
        let store = Arc::new(MemoryPersister::new());
        let player =
            transport(RecordMode::None, &store).with_failure_policy(FailurePolicy::Synthesize);

        let response = player.send(get("http://b.test/y")).await.unwrap();
        assert_eq!(response.status.code, SYNTHESIZED_STATUS);
        assert!(response.body_text().unwrap().contains("http://b.test/y"));
        assert!(player.cassette().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_propagates_and_is_not_recorded() {
        let store = Arc::new(MemoryPersister::new());
        let cassette = Cassette::builder("failing")
            .record_mode(RecordMode::NewEpisodes)
            .persister(store.clone())
            .load()
            .unwrap();
        let failing = CassetteTransport::new(
            cassette,
            EchoTransport {
                fail: true,
                ..EchoTransport::default()
            },
        );

        let result = failing.send(get("http://b.test/y")).await;
        assert!(matches!(result, Err(TapedeckError::Transport(_))));
        assert!(failing.cassette().is_empty());
    }

    #[tokio::test]
    async fn test_filtered_request_hits_network_even_when_write_protected() {
        let store = Arc::new(MemoryPersister::new());
        let player = transport(RecordMode::None, &store);

        let response = player.send(get("http://localhost:8080/health")).await.unwrap();
        assert_eq!(response.body_text(), Some("/health"));
        assert!(player.cassette().is_empty());
        assert!(!player.finish().unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_new_episodes_record_each_call() {
        let store = Arc::new(MemoryPersister::new());
        let recorder = Arc::new(transport(RecordMode::NewEpisodes, &store));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let recorder = Arc::clone(&recorder);
                tokio::spawn(async move {
                    recorder
                        .send(get(&format!("http://b.test/item/{i}")))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(recorder.cassette().len(), 16);
        assert_eq!(recorder.inner().calls.load(Ordering::SeqCst), 16);
    }
}
