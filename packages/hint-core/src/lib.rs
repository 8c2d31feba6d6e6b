//! Orchestration core for page-audit rules.
//!
//! Rules are independently authored plug-ins that subscribe to lifecycle
//! events of a page audit and report findings. This crate is the layer they
//! share: it delivers connector events to rules in a fixed order, isolates
//! failing rules, fetches each resource at most once per run, and turns
//! everything rules report into one ordered, filtered report.
//!
//! ```text
//! connector ─▶ Orchestrator ─▶ EventBus ─▶ rule handlers (HintContext) ─▶ ReportAggregator ─▶ Report
//!                                              │
//!                                              └─▶ FetchCache ─▶ FetchTransport
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use hint_core::{FnRule, HintConfig, Orchestrator, ReportOptions, Severity};
//! use hint_core::testing::MockTransport;
//!
//! let icons = FnRule::new("apple-touch-icons", |ctx| {
//!     let reporter = ctx.clone();
//!     ctx.on("traverse::end", move |event| {
//!         let ctx = reporter.clone();
//!         async move {
//!             let has_icon = ctx
//!                 .page_dom()
//!                 .is_some_and(|dom| dom.by_tag("link").any(|l| l.attribute("rel") == Some("apple-touch-icon")));
//!             if !has_icon {
//!                 ctx.report(event.resource(), "no icon found", ReportOptions::new(Severity::Error))?;
//!             }
//!             Ok(())
//!         }
//!     })?;
//!     Ok(())
//! });
//!
//! let mut orchestrator = Orchestrator::new(HintConfig::new(), MockTransport::new()).with_rule(icons);
//! let report = orchestrator.run("https://example.com/", connector_events).await?;
//! ```
//!
//! # Modules
//!
//! - [`topic`] - Segmented topics and wildcard patterns
//! - [`event`] - The closed set of lifecycle events
//! - [`bus`] - Ordered pub-sub with per-handler fault isolation
//! - [`fetch`] - Single-flight fetch cache and the transport seam
//! - [`transport`] - reqwest-backed transport
//! - [`config`] - Configuration file model and per-run resolution
//! - [`context`] - The per-rule facade
//! - [`report`] - Findings, aggregation and the final report
//! - [`orchestrator`] - The run state machine
//! - [`testing`] - Mock implementations for testing

pub mod bus;
pub mod config;
pub mod context;
pub mod dom;
pub mod error;
pub mod event;
pub mod fetch;
pub mod network;
pub mod orchestrator;
pub mod report;
pub mod rule;
pub mod severity;
pub mod testing;
pub mod topic;
pub mod transport;

// Re-export core types at crate root
pub use bus::{EventBus, EventHandler, HandlerFault, PublishResult, SubscriptionHandle};
pub use config::{ConfigResolver, HintConfig, IgnoredUrl, RuleOptions, RuleSetting};
pub use context::{HintContext, PageSnapshot, ReportOptions};
pub use dom::{Document, Element, Location};
pub use error::{ConfigError, ConnectorError, FetchError, FetchResult, HintError, Result};
pub use event::{Event, FetchEnd, FetchFailed, ResourceKind};
pub use fetch::{FetchCache, FetchTransport};
pub use network::{
    FetchKey, Hop, HttpHeaders, Method, NetworkData, RedirectChain, Request, Response,
};
pub use orchestrator::{Orchestrator, RunState};
pub use report::{Finding, Report, ReportAggregator};
pub use rule::{FnRule, Rule, RuleMeta};
pub use severity::{Severity, SeveritySetting};
pub use topic::{Segment, Topic, TopicPattern};
pub use transport::HttpTransport;
