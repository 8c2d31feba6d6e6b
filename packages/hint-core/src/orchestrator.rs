//! Drives one audit run.
//!
//! ```text
//! Idle ──start──▶ Running ──traverse::end / abort / stream end──▶ Finalizing ──▶ Done
//! ```
//!
//! `start` resolves configuration and registers every enabled rule. While
//! running, connector events are published on the bus in the order they
//! arrive, each one fully dispatched before the next. Handler faults become
//! error findings for the failing rule. Once the terminal event has been
//! dispatched the rules are torn down and the report is finalized.
//!
//! One orchestrator is one run; it cannot be restarted.
//!
//! ```ignore
//! let mut orchestrator = Orchestrator::new(config, HttpTransport::try_new(DEFAULT_TIMEOUT)?)
//!     .with_rule(NoHttpRedirects);
//! let report = orchestrator.run("https://example.com/", events).await?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::bus::{extract_panic_message, EventBus, HandlerFault, PublishResult};
use crate::config::{ConfigResolver, HintConfig};
use crate::context::{HintContext, PageSnapshot};
use crate::error::{ConnectorError, HintError, Result};
use crate::event::{Event, ResourceKind};
use crate::fetch::{FetchCache, FetchTransport};
use crate::report::{Finding, Report, ReportAggregator};
use crate::rule::Rule;
use crate::severity::Severity;

// =============================================================================
// Run State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Running,
    Finalizing,
    Done,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Finalizing => "finalizing",
            RunState::Done => "done",
        }
    }

    fn successor(&self) -> Option<RunState> {
        match self {
            RunState::Idle => Some(RunState::Running),
            RunState::Running => Some(RunState::Finalizing),
            RunState::Finalizing => Some(RunState::Done),
            RunState::Done => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Orchestrator {
    config: HintConfig,
    rules: Vec<Arc<dyn Rule>>,
    state: RunState,
    bus: EventBus,
    fetch: FetchCache,
    reports: ReportAggregator,
    page: PageSnapshot,
    resolver: Option<ConfigResolver>,
    contexts: Vec<HintContext>,
    report: Option<Report>,
    abort_reason: Option<String>,
}

impl Orchestrator {
    pub fn new<T: FetchTransport>(config: HintConfig, transport: T) -> Self {
        Self::from_fetch_cache(config, FetchCache::new(transport))
    }

    /// Use a preconfigured fetch cache, e.g. one with a redirect limit.
    pub fn from_fetch_cache(config: HintConfig, fetch: FetchCache) -> Self {
        Self {
            config,
            rules: Vec::new(),
            state: RunState::Idle,
            bus: EventBus::new(),
            fetch,
            reports: ReportAggregator::new(),
            page: PageSnapshot::default(),
            resolver: None,
            contexts: Vec::new(),
            report: None,
            abort_reason: None,
        }
    }

    /// Add a rule. Rules register, and therefore dispatch, in the order added.
    pub fn with_rule<R: Rule>(mut self, rule: R) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn add_rule(&mut self, rule: Arc<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The finalized report, once the run is done.
    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    /// Why the run was aborted, if it was.
    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn fetch_cache(&self) -> &FetchCache {
        &self.fetch
    }

    /// Resolved configuration, available once the run has started.
    pub fn resolver(&self) -> Option<&ConfigResolver> {
        self.resolver.as_ref()
    }

    /// Resolve configuration and register rules for an audit of `target`.
    ///
    /// Configuration faults and duplicate rule ids fail here, before any
    /// event is published. A rule whose registration fails is torn down and
    /// reported; the run still starts.
    pub fn start(&mut self, target: &str) -> Result<()> {
        if self.state != RunState::Idle {
            return Err(HintError::InvalidTransition {
                from: self.state,
                to: RunState::Running,
            });
        }

        let metas: Vec<_> = self.rules.iter().map(|rule| rule.meta()).collect();
        let mut seen = HashSet::with_capacity(metas.len());
        for meta in &metas {
            if !seen.insert(meta.id.as_str()) {
                return Err(HintError::DuplicateRule(meta.id.clone()));
            }
        }

        let resolver = ConfigResolver::resolve(&self.config, &metas).map_err(|e| {
            error!(error = %e, "configuration rejected");
            e
        })?;

        self.page = PageSnapshot::new(target);
        self.reports.observe_resource(target);
        self.transition(RunState::Running)?;
        info!(page = %target, rules = self.rules.len(), "run started");

        for (rule, meta) in self.rules.iter().zip(&metas) {
            if resolver.is_disabled(&meta.id) {
                debug!(rule = %meta.id, "rule is off");
                continue;
            }

            // Every enabled rule has resolved options.
            let Some(options) = resolver.options_for(&meta.id) else {
                continue;
            };

            let ctx = HintContext::new(
                options,
                self.bus.clone(),
                self.fetch.clone(),
                self.reports.clone(),
                self.page.clone(),
            );

            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| rule.register(&ctx)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{e:#}")),
                Err(panic_info) => Some(extract_panic_message(&panic_info)),
            };

            match failure {
                None => {
                    debug!(rule = %meta.id, "rule registered");
                    self.contexts.push(ctx);
                }
                Some(message) => {
                    let removed = ctx.teardown();
                    warn!(rule = %meta.id, error = %message, removed, "rule registration failed");
                    self.reports.record(Finding::new(
                        target,
                        meta.id.as_str(),
                        format!("'{}' failed to register: {message}", meta.id),
                        Severity::Error,
                    ))?;
                }
            }
        }

        self.resolver = Some(resolver);
        Ok(())
    }

    /// Publish one connector event and wait for every handler to settle.
    ///
    /// Dispatching the terminal event finalizes the run.
    pub async fn dispatch(&mut self, event: Event) -> Result<PublishResult> {
        let topic = event.topic();

        if self.state != RunState::Running {
            return Err(HintError::NotRunning {
                topic: topic.to_string(),
                state: self.state,
            });
        }

        self.reports.observe_resource(event.resource());
        self.update_snapshot(&event);

        let terminal = event.is_terminal();
        let result = self.bus.publish(&topic, Arc::new(event)).await;

        for fault in &result.faults {
            self.record_fault(fault)?;
        }

        if terminal {
            info!(topic = %topic, "terminal event dispatched");
            self.finish()?;
        }

        Ok(result)
    }

    /// Stop the run and finalize whatever was recorded.
    ///
    /// Fetches still in flight settle in the cache but are not awaited.
    pub fn abort(&mut self, reason: &str) -> Result<Report> {
        match self.state {
            RunState::Running => {
                warn!(reason = %reason, "run aborted");
                self.abort_reason = Some(reason.to_string());
                self.finish()
            }
            RunState::Done => self.report.clone().ok_or(HintError::InvalidTransition {
                from: RunState::Done,
                to: RunState::Finalizing,
            }),
            from => Err(HintError::InvalidTransition {
                from,
                to: RunState::Finalizing,
            }),
        }
    }

    /// Run a whole audit from a connector feed.
    ///
    /// A connector error aborts the run; its report is still returned.
    /// Events after the terminal one are ignored.
    pub async fn run<S>(&mut self, target: &str, events: S) -> Result<Report>
    where
        S: Stream<Item = std::result::Result<Event, ConnectorError>>,
    {
        self.start(target)?;

        let mut events = std::pin::pin!(events);
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    self.dispatch(event).await?;
                    if self.state == RunState::Done {
                        break;
                    }
                }
                Err(e) => return self.abort(&e.message),
            }
        }

        if self.state == RunState::Running {
            info!("connector feed ended before traverse::end");
            return self.finish();
        }

        self.report.clone().ok_or(HintError::InvalidTransition {
            from: self.state,
            to: RunState::Done,
        })
    }

    fn update_snapshot(&self, event: &Event) {
        match event {
            Event::ParseEnd { document, .. } => {
                debug!(elements = document.len(), "page document updated");
                self.page.set_document(document.clone());
            }
            Event::FetchEnd(end)
                if end.kind == ResourceKind::Html && end.resource == self.page.url() =>
            {
                debug!(headers = end.response.headers.len(), "page headers updated");
                self.page.set_headers(end.response.headers.clone());
            }
            _ => {}
        }
    }

    fn record_fault(&self, fault: &HandlerFault) -> Result<()> {
        self.reports.record(Finding::new(
            fault.resource.as_str(),
            fault.rule_id.as_str(),
            format!(
                "'{}' failed while handling '{}': {}",
                fault.rule_id, fault.topic, fault.message
            ),
            Severity::Error,
        ))
    }

    fn finish(&mut self) -> Result<Report> {
        self.transition(RunState::Finalizing)?;

        let removed: usize = self.contexts.drain(..).map(|ctx| ctx.teardown()).sum();
        debug!(removed, "rules torn down");

        let Some(resolver) = &self.resolver else {
            return Err(HintError::InvalidTransition {
                from: RunState::Finalizing,
                to: RunState::Done,
            });
        };
        let report = self.reports.finalize(resolver);

        self.report = Some(report.clone());
        self.transition(RunState::Done)?;
        info!(findings = report.len(), "run finished");
        Ok(report)
    }

    fn transition(&mut self, to: RunState) -> Result<()> {
        if self.state.successor() != Some(to) {
            return Err(HintError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!(from = %self.state, to = %to, "run state changed");
        self.state = to;
        Ok(())
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("rules", &self.rules.len())
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}
