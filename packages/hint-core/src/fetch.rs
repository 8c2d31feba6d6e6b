//! Single-flight content fetching with redirect-chain recording.
//!
//! The [`FetchCache`] is scoped to one run. The first caller for a
//! [`FetchKey`] drives the request; concurrent callers for the same key
//! attach to the pending outcome, and later callers get the stored outcome.
//! Failures are shared the same way, so K observers of one key always see
//! the same `NetworkData` or the same `FetchError`.
//!
//! Redirects are followed here, not by the transport: each redirect
//! response appends a [`Hop`] before the `Location` target is requested.
//! No redirect limit is applied unless one is configured explicitly; rules
//! decide how many hops are acceptable. A chain that revisits a URL fails
//! with [`FetchError::RedirectLoop`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{FetchError, FetchResult};
use crate::network::{FetchKey, Hop, NetworkData, RedirectChain, Request, Response};

/// Performs exactly one request. Implementations must not follow redirects.
///
/// Transport timeouts are reported as [`FetchError::Timeout`]; HTTP error
/// statuses are returned as ordinary responses.
#[async_trait]
pub trait FetchTransport: Send + Sync + 'static {
    async fn send(&self, request: &Request) -> FetchResult<Response>;
}

type Outcome = FetchResult<Arc<NetworkData>>;

/// Per-run deduplicating fetcher.
///
/// Cheap to clone; clones share entries and counters.
#[derive(Clone)]
pub struct FetchCache {
    transport: Arc<dyn FetchTransport>,
    entries: Arc<DashMap<FetchKey, Arc<OnceCell<Outcome>>>>,
    redirect_limit: Option<usize>,
    resolutions: Arc<AtomicUsize>,
    round_trips: Arc<AtomicUsize>,
}

impl FetchCache {
    pub fn new<T: FetchTransport>(transport: T) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    /// Create a cache over a shared transport.
    pub fn from_arc(transport: Arc<dyn FetchTransport>) -> Self {
        Self {
            transport,
            entries: Arc::new(DashMap::new()),
            redirect_limit: None,
            resolutions: Arc::new(AtomicUsize::new(0)),
            round_trips: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail fetches that need more than `limit` redirects.
    pub fn with_redirect_limit(mut self, limit: usize) -> Self {
        self.redirect_limit = Some(limit);
        self
    }

    /// Fetch `key`, sharing the outcome with every other caller for the same key.
    pub async fn fetch(&self, key: FetchKey) -> Outcome {
        // Clone the cell out so no map shard stays locked across the await.
        let cell = self.entries.entry(key.clone()).or_default().clone();

        if let Some(outcome) = cell.get() {
            debug!(key = %key, "fetch cache hit");
            return outcome.clone();
        }

        cell.get_or_init(|| self.resolve(key)).await.clone()
    }

    /// `GET` an absolute URL.
    pub async fn fetch_url(&self, url: &str) -> Outcome {
        let key = FetchKey::get(url)?;
        self.fetch(key).await
    }

    /// Number of distinct fetches that went to the network.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::Acquire)
    }

    /// Number of transport requests, counting each redirect hop.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::Acquire)
    }

    /// Number of keys seen this run.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn resolve(&self, key: FetchKey) -> Outcome {
        self.resolutions.fetch_add(1, Ordering::AcqRel);
        info!(key = %key, "fetching");

        let mut chain = RedirectChain::default();
        let mut current = key.url().clone();

        loop {
            let request = Request::new(current.as_str(), key.method());
            self.round_trips.fetch_add(1, Ordering::AcqRel);

            let mut response = self.transport.send(&request).await.map_err(|e| {
                warn!(key = %key, url = %current, error = %e, "fetch failed");
                e
            })?;

            if !response.is_redirect() {
                debug!(
                    key = %key,
                    status = response.status_code,
                    hops = chain.len(),
                    "fetch resolved"
                );
                response.url = current.to_string();
                response.hops = chain;

                return Ok(Arc::new(NetworkData {
                    request: Request::new(key.url().as_str(), key.method()),
                    response,
                }));
            }

            let missing_location = || FetchError::MissingLocation {
                url: current.to_string(),
                status_code: response.status_code,
            };
            let location = response.header("location").ok_or_else(missing_location)?;
            let next = current.join(location).map_err(|_| missing_location())?;

            if next == current || chain.iter().any(|hop| hop.url == next.as_str()) {
                warn!(key = %key, url = %next, hops = chain.len() + 1, "redirect loop");
                return Err(FetchError::RedirectLoop {
                    url: key.url().to_string(),
                    hops: chain.len() + 1,
                });
            }

            chain.push(Hop {
                url: current.to_string(),
                status_code: response.status_code,
            });
            debug!(
                key = %key,
                from = %current,
                to = %next,
                hops = chain.len(),
                "following redirect"
            );

            if let Some(limit) = self.redirect_limit {
                if chain.len() > limit {
                    return Err(FetchError::RedirectLimit {
                        url: key.url().to_string(),
                        limit,
                    });
                }
            }

            current = next;
        }
    }
}

impl std::fmt::Debug for FetchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCache")
            .field("entries", &self.entries.len())
            .field("redirect_limit", &self.redirect_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fetch_returns_body_and_status() {
        let transport = MockTransport::new().with_response(
            "https://x/icon.png",
            Response::new(200).with_body(b"png".to_vec()),
        );
        let cache = FetchCache::new(transport);

        let data = cache.fetch_url("https://x/icon.png").await.unwrap();

        assert_eq!(data.response.status_code, 200);
        assert_eq!(data.response.body, b"png");
        assert_eq!(data.response.url, "https://x/icon.png");
        assert!(data.response.hops.is_empty());
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let transport = MockTransport::new().with_response("https://x/a.css", Response::new(200));
        let cache = FetchCache::new(transport.clone());

        let first = cache.fetch_url("https://x/a.css").await.unwrap();
        let second = cache.fetch_url("https://x/a.css").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(cache.resolutions(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_request() {
        let transport = MockTransport::new()
            .with_response("https://x/big.js", Response::new(200).with_body(b"js".to_vec()))
            .with_latency(Duration::from_millis(30));
        let cache = FetchCache::new(transport.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.fetch_url("https://x/big.js").await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(transport.call_count(), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    #[tokio::test]
    async fn test_redirect_chain_recorded_in_order() {
        let transport = MockTransport::new()
            .with_redirect("http://x/", 301, "https://x/")
            .with_redirect("https://x/", 302, "/home")
            .with_response("https://x/home", Response::new(200).with_body(b"final".to_vec()));
        let cache = FetchCache::new(transport.clone());

        let data = cache.fetch_url("http://x/").await.unwrap();
        let hops = data.response.hops.hops();

        assert_eq!(hops.len(), 2);
        assert_eq!(hops[0].url, "http://x/");
        assert_eq!(hops[0].status_code, 301);
        assert_eq!(hops[1].url, "https://x/");
        assert_eq!(hops[1].status_code, 302);
        assert_eq!(data.response.url, "https://x/home");
        assert_eq!(data.response.body, b"final");
        assert_eq!(data.request.url, "http://x/");
        assert_eq!(cache.round_trips(), 3);
        assert_eq!(cache.resolutions(), 1);
    }

    #[tokio::test]
    async fn test_http_error_status_is_success_outcome() {
        let transport = MockTransport::new();
        let cache = FetchCache::new(transport);

        let data = cache.fetch_url("https://x/missing.png").await.unwrap();
        assert_eq!(data.response.status_code, 404);
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_failure_and_shared() {
        let transport = MockTransport::new().with_failure(
            "https://x/slow",
            FetchError::Timeout {
                url: "https://x/slow".into(),
            },
        );
        let cache = FetchCache::new(transport.clone());

        let first = cache.fetch_url("https://x/slow").await.unwrap_err();
        let second = cache.fetch_url("https://x/slow").await.unwrap_err();

        assert!(first.is_timeout());
        assert_eq!(first, second);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_redirect_without_location_fails() {
        let transport = MockTransport::new().with_response("https://x/", Response::new(302));
        let cache = FetchCache::new(transport);

        let err = cache.fetch_url("https://x/").await.unwrap_err();
        assert_eq!(
            err,
            FetchError::MissingLocation {
                url: "https://x/".into(),
                status_code: 302
            }
        );
    }

    #[tokio::test]
    async fn test_explicit_redirect_limit() {
        let transport = MockTransport::new()
            .with_redirect("https://x/a", 301, "https://x/b")
            .with_redirect("https://x/b", 301, "https://x/c")
            .with_response("https://x/c", Response::new(200));
        let cache = FetchCache::new(transport).with_redirect_limit(1);

        let err = cache.fetch_url("https://x/a").await.unwrap_err();
        assert!(matches!(err, FetchError::RedirectLimit { limit: 1, .. }));
    }

    #[tokio::test]
    async fn test_redirect_cycle_fails_and_is_shared() {
        let transport = MockTransport::new()
            .with_redirect("https://x/a", 301, "https://x/b")
            .with_redirect("https://x/b", 302, "https://x/a");
        let cache = FetchCache::new(transport.clone());

        let pending = cache.fetch_url("https://x/a");
        let first = tokio::time::timeout(Duration::from_millis(500), pending)
            .await
            .expect("redirect cycle should not hang")
            .unwrap_err();
        let second = cache.fetch_url("https://x/a").await.unwrap_err();

        assert_eq!(
            first,
            FetchError::RedirectLoop {
                url: "https://x/a".into(),
                hops: 2
            }
        );
        assert_eq!(first, second);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_self_redirect_fails() {
        let transport = MockTransport::new().with_redirect("https://x/", 307, "/");
        let cache = FetchCache::new(transport);

        let err = cache.fetch_url("https://x/").await.unwrap_err();
        assert!(matches!(err, FetchError::RedirectLoop { hops: 1, .. }));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_request() {
        let transport = MockTransport::new();
        let cache = FetchCache::new(transport.clone());

        let err = cache.fetch_url("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
        assert_eq!(transport.call_count(), 0);
    }
}
