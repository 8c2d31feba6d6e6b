//! The per-rule view of a run.
//!
//! Every rule gets its own [`HintContext`]. Subscriptions and findings made
//! through it are always tagged with that rule's id, so a rule cannot act on
//! behalf of another. The context is immutable apart from the page snapshot
//! the orchestrator updates as the connector reports progress, and it is
//! cheap to clone into handler closures.

use std::sync::{Arc, Mutex, RwLock};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::bus::{EventBus, EventHandler, SubscriptionHandle};
use crate::config::RuleOptions;
use crate::dom::{Document, Element};
use crate::error::{ConfigError, FetchResult, Result};
use crate::fetch::FetchCache;
use crate::network::{HttpHeaders, NetworkData};
use crate::report::{Finding, ReportAggregator};
use crate::severity::Severity;
use crate::topic::TopicPattern;

/// Extra data attached to a finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    pub severity: Severity,
    pub element: Option<Element>,
    pub code_snippet: Option<String>,
    pub code_language: Option<String>,
}

impl ReportOptions {
    pub fn new(severity: Severity) -> Self {
        Self {
            severity,
            element: None,
            code_snippet: None,
            code_language: None,
        }
    }

    pub fn with_element(mut self, element: Element) -> Self {
        self.element = Some(element);
        self
    }

    pub fn with_code_snippet(
        mut self,
        snippet: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        self.code_snippet = Some(snippet.into());
        self.code_language = Some(language.into());
        self
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    document: Option<Arc<Document>>,
    headers: Option<HttpHeaders>,
}

/// What the run currently knows about the audited page.
///
/// Written only by the orchestrator; rules read it through [`HintContext`].
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    state: Arc<RwLock<PageState>>,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            state: Arc::new(RwLock::new(PageState {
                url: url.into(),
                ..Default::default()
            })),
        }
    }

    pub fn url(&self) -> String {
        self.state.read().unwrap_or_else(|e| e.into_inner()).url.clone()
    }

    pub fn document(&self) -> Option<Arc<Document>> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .document
            .clone()
    }

    pub fn headers(&self) -> Option<HttpHeaders> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .headers
            .clone()
    }

    pub(crate) fn set_document(&self, document: Document) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).document = Some(Arc::new(document));
    }

    pub(crate) fn set_headers(&self, headers: HttpHeaders) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).headers = Some(headers);
    }
}

/// Rule-scoped access to the bus, the fetch cache, the report and the
/// resolved configuration.
#[derive(Clone)]
pub struct HintContext {
    rule_id: Arc<str>,
    options: Arc<RuleOptions>,
    bus: EventBus,
    fetch: FetchCache,
    reports: ReportAggregator,
    page: PageSnapshot,
    handles: Arc<Mutex<Vec<SubscriptionHandle>>>,
}

impl HintContext {
    pub(crate) fn new(
        options: Arc<RuleOptions>,
        bus: EventBus,
        fetch: FetchCache,
        reports: ReportAggregator,
        page: PageSnapshot,
    ) -> Self {
        Self {
            rule_id: Arc::from(options.rule_id.as_str()),
            options,
            bus,
            fetch,
            reports,
            page,
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    /// Subscribe to every event whose topic matches `pattern`.
    ///
    /// `pattern` uses `::` or `.` between segments; `*` matches exactly one
    /// segment.
    pub fn on<H: EventHandler>(&self, pattern: &str, handler: H) -> Result<SubscriptionHandle> {
        let pattern = TopicPattern::parse(pattern)?;
        let handle = self.bus.subscribe(pattern, self.rule_id.as_ref(), handler);
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
        Ok(handle)
    }

    /// Record a finding for `resource`.
    ///
    /// A severity override configured for this rule replaces
    /// `options.severity`.
    pub fn report(
        &self,
        resource: impl Into<String>,
        message: impl Into<String>,
        options: ReportOptions,
    ) -> Result<()> {
        let severity = self.options.severity.resolve(options.severity);
        let finding = Finding {
            element: options.element,
            code_snippet: options.code_snippet,
            code_language: options.code_language,
            ..Finding::new(resource, self.rule_id.as_ref(), message, severity)
        };
        self.reports.record(finding)
    }

    /// Fetch `url` through the run's shared cache.
    pub async fn fetch_content(&self, url: &str) -> FetchResult<Arc<NetworkData>> {
        debug!(rule = %self.rule_id, url = %url, "fetch requested");
        self.fetch.fetch_url(url).await
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.options.options
    }

    /// Deserialize one option, `None` when it is not set.
    pub fn option<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.options.options.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ConfigError::from(e).into()),
            None => Ok(None),
        }
    }

    pub fn targeted_browsers(&self) -> &[String] {
        &self.options.targeted_browsers
    }

    pub fn language(&self) -> &str {
        &self.options.language
    }

    /// The parsed page, once `parse::end::html` has been dispatched.
    pub fn page_dom(&self) -> Option<Arc<Document>> {
        self.page.document()
    }

    /// Response headers of the audited page, once it has been fetched.
    pub fn page_headers(&self) -> Option<HttpHeaders> {
        self.page.headers()
    }

    pub fn page_url(&self) -> String {
        self.page.url()
    }

    /// Drop every subscription this rule made.
    pub(crate) fn teardown(&self) -> usize {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        handles
            .into_iter()
            .filter(|handle| self.bus.unsubscribe(*handle))
            .count()
    }
}

impl std::fmt::Debug for HintContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HintContext")
            .field("rule_id", &self.rule_id)
            .field("severity", &self.options.severity)
            .finish_non_exhaustive()
    }
}
