//! Testing utilities including mock implementations.
//!
//! These are useful for testing rules and runs without making real network
//! calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::context::HintContext;
use crate::error::{FetchError, FetchResult};
use crate::event::Event;
use crate::fetch::FetchTransport;
use crate::network::{Request, Response};
use crate::rule::{Rule, RuleMeta};

#[derive(Debug, Clone)]
enum MockRoute {
    Respond(Response),
    Fail(FetchError),
}

/// A scripted transport.
///
/// Unknown URLs answer `404`. Clones share routes and call history.
#[derive(Clone, Default)]
pub struct MockTransport {
    /// Scripted outcomes by normalized URL
    routes: Arc<RwLock<HashMap<String, MockRoute>>>,

    /// Delay applied to every request
    latency: Option<Duration>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<Request>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response`.
    pub fn with_response(self, url: &str, response: Response) -> Self {
        self.routes
            .write()
            .unwrap()
            .insert(normalize(url), MockRoute::Respond(response));
        self
    }

    /// Answer `url` with a redirect to `location`, which may be relative.
    pub fn with_redirect(self, url: &str, status_code: u16, location: &str) -> Self {
        let response = Response::new(status_code).with_header("location", location);
        self.with_response(url, response)
    }

    /// Fail every request for `url`.
    pub fn with_failure(self, url: &str, error: FetchError) -> Self {
        self.routes
            .write()
            .unwrap()
            .insert(normalize(url), MockRoute::Fail(error));
        self
    }

    /// Delay every request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Get all requests made to this mock.
    pub fn calls(&self) -> Vec<Request> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Number of requests for one URL.
    pub fn calls_for(&self, url: &str) -> usize {
        let url = normalize(url);
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|request| request.url == url)
            .count()
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }
}

#[async_trait]
impl FetchTransport for MockTransport {
    async fn send(&self, request: &Request) -> FetchResult<Response> {
        self.calls.write().unwrap().push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let route = self.routes.read().unwrap().get(&normalize(&request.url)).cloned();
        match route {
            Some(MockRoute::Respond(response)) => Ok(response),
            Some(MockRoute::Fail(error)) => Err(error),
            None => Ok(Response::new(404)),
        }
    }
}

fn normalize(url: &str) -> String {
    url::Url::parse(url)
        .map(|parsed| parsed.to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// One event seen by a [`RecordingRule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub rule_id: String,
    pub topic: String,
    pub resource: String,
}

/// Shared, append-only log of recorded events.
#[derive(Debug, Clone, Default)]
pub struct RecordLog {
    entries: Arc<RwLock<Vec<RecordedEvent>>>,
}

impl RecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<RecordedEvent> {
        self.entries.read().unwrap().clone()
    }

    /// `rule_id@topic` for every entry, in order.
    pub fn labels(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .map(|e| format!("{}@{}", e.rule_id, e.topic))
            .collect()
    }

    fn push(&self, entry: RecordedEvent) {
        self.entries.write().unwrap().push(entry);
    }
}

/// A rule that records every event it is subscribed to.
///
/// Several recording rules can share one [`RecordLog`] to observe dispatch
/// order across rules.
#[derive(Debug, Clone)]
pub struct RecordingRule {
    id: String,
    patterns: Vec<String>,
    log: RecordLog,
}

impl RecordingRule {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            patterns: Vec::new(),
            log: RecordLog::new(),
        }
    }

    /// Subscribe to `pattern` at registration.
    pub fn on(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn with_log(mut self, log: RecordLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> RecordLog {
        self.log.clone()
    }
}

impl Rule for RecordingRule {
    fn meta(&self) -> RuleMeta {
        RuleMeta::new(self.id.clone())
    }

    fn register(&self, ctx: &HintContext) -> anyhow::Result<()> {
        for pattern in &self.patterns {
            let log = self.log.clone();
            let rule_id = self.id.clone();
            ctx.on(pattern, move |event: Arc<Event>| {
                let log = log.clone();
                let rule_id = rule_id.clone();
                async move {
                    log.push(RecordedEvent {
                        rule_id,
                        topic: event.topic().to_string(),
                        resource: event.resource().to_string(),
                    });
                    Ok(())
                }
            })?;
        }
        Ok(())
    }
}
