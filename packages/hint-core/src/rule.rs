//! The plug-in seam for audit rules.

use serde_json::{Map, Value};

use crate::context::HintContext;

/// Static description of a rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleMeta {
    pub id: String,
    /// Built-in option defaults, overridden by configuration
    pub default_options: Map<String, Value>,
}

impl RuleMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default_options: Map::new(),
        }
    }

    pub fn with_default_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.default_options.insert(key.into(), value);
        self
    }
}

/// An audit rule.
///
/// `register` runs once per run with a context scoped to this rule. The rule
/// subscribes through [`HintContext::on`] and reports through
/// [`HintContext::report`]. Returning an error from `register` drops every
/// subscription the rule made and records a diagnostic finding; other rules
/// are unaffected.
pub trait Rule: Send + Sync + 'static {
    fn meta(&self) -> RuleMeta;

    fn register(&self, ctx: &HintContext) -> anyhow::Result<()>;
}

/// A rule built from a closure.
///
/// ```ignore
/// let rule = FnRule::new("no-icon", |ctx| {
///     let reporter = ctx.clone();
///     ctx.on("traverse::end", move |event: Arc<Event>| {
///         let ctx = reporter.clone();
///         async move {
///             ctx.report(event.resource(), "no icon found", ReportOptions::new(Severity::Error))?;
///             Ok(())
///         }
///     })?;
///     Ok(())
/// });
/// ```
pub struct FnRule<F> {
    meta: RuleMeta,
    register: F,
}

impl<F> FnRule<F>
where
    F: Fn(&HintContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    pub fn new(id: impl Into<String>, register: F) -> Self {
        Self {
            meta: RuleMeta::new(id),
            register,
        }
    }

    pub fn with_meta(meta: RuleMeta, register: F) -> Self {
        Self { meta, register }
    }
}

impl<F> Rule for FnRule<F>
where
    F: Fn(&HintContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn meta(&self) -> RuleMeta {
        self.meta.clone()
    }

    fn register(&self, ctx: &HintContext) -> anyhow::Result<()> {
        (self.register)(ctx)
    }
}
