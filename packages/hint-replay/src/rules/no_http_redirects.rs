//! Flags resources reached through more redirects than allowed.

use std::sync::Arc;

use hint_core::{Event, HintContext, ReportOptions, ResourceKind, Rule, RuleMeta, Severity};
use serde_json::json;

pub const ID: &str = "no-http-redirects";

/// Options: `max-html-redirects` for the page itself and
/// `max-resource-redirects` for everything else. Both default to 0.
pub struct NoHttpRedirects;

impl Rule for NoHttpRedirects {
    fn meta(&self) -> RuleMeta {
        RuleMeta::new(ID)
            .with_default_option("max-resource-redirects", json!(0))
            .with_default_option("max-html-redirects", json!(0))
    }

    fn register(&self, ctx: &HintContext) -> anyhow::Result<()> {
        let max_resource_hops: usize = ctx.option("max-resource-redirects")?.unwrap_or(0);
        let max_html_hops: usize = ctx.option("max-html-redirects")?.unwrap_or(0);

        let reporter = ctx.clone();
        ctx.on("fetch::end::*", move |event: Arc<Event>| {
            let ctx = reporter.clone();
            async move {
                let Event::FetchEnd(end) = event.as_ref() else {
                    return Ok(());
                };

                let max_hops = match end.kind {
                    ResourceKind::Html => max_html_hops,
                    _ => max_resource_hops,
                };
                let hops = end.response.hops.len();
                if hops <= max_hops {
                    return Ok(());
                }

                let mut options = ReportOptions::new(Severity::Warning);
                if let Some(element) = &end.element {
                    options = options.with_element(element.clone());
                }
                ctx.report(
                    end.request.url.as_str(),
                    format!(
                        "{hops} redirect(s) detected for '{}' (max is {max_hops}).",
                        end.request.url
                    ),
                    options,
                )?;
                Ok(())
            }
        })?;

        Ok(())
    }
}
