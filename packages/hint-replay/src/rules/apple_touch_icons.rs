//! Checks the page's `apple-touch-icon`.
//!
//! The recommended setup is a single `<link rel="apple-touch-icon">` without
//! `sizes`, pointing at a reachable 180x180 PNG.

use std::sync::Arc;

use hint_core::{Element, Event, HintContext, ReportOptions, Rule, RuleMeta, Severity};
use tracing::debug;
use url::Url;

pub const ID: &str = "apple-touch-icons";

const RECOMMENDED_SIZE: u32 = 180;
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

pub struct AppleTouchIcons;

impl Rule for AppleTouchIcons {
    fn meta(&self) -> RuleMeta {
        RuleMeta::new(ID)
    }

    fn register(&self, ctx: &HintContext) -> anyhow::Result<()> {
        let reporter = ctx.clone();
        ctx.on("traverse::end", move |event: Arc<Event>| {
            let ctx = reporter.clone();
            async move { validate(&ctx, event.resource()).await }
        })?;
        Ok(())
    }
}

async fn validate(ctx: &HintContext, resource: &str) -> anyhow::Result<()> {
    let Some(dom) = ctx.page_dom() else {
        debug!(resource = %resource, "no document to check");
        return Ok(());
    };

    let icons: Vec<&Element> = dom.by_tag("link").filter(|l| is_apple_touch_icon(l)).collect();

    let Some(icon) = choose_best_icon(&icons) else {
        let links_to_manifest = dom
            .by_tag("link")
            .any(|l| rel_values(l).iter().any(|rel| rel == "manifest"));
        if links_to_manifest {
            ctx.report(
                resource,
                "'apple-touch-icon' was not specified.",
                ReportOptions::new(Severity::Error),
            )?;
        }
        return Ok(());
    };

    let at = |severity| ReportOptions::new(severity).with_element(icon.clone());

    if rel_values(icon) != ["apple-touch-icon"] {
        ctx.report(
            resource,
            "'apple-touch-icon' should use 'rel=\"apple-touch-icon\"'.",
            at(Severity::Warning),
        )?;
    }

    if icon.attribute("sizes").is_some_and(|s| !s.trim().is_empty()) {
        ctx.report(
            resource,
            "'apple-touch-icon' 'sizes' attribute is not needed.",
            at(Severity::Warning),
        )?;
    }

    check_image(ctx, icon, resource).await?;

    for other in icons.iter().filter(|other| !other.is_same(icon)) {
        ctx.report(
            resource,
            "'apple-touch-icon' is already specified.",
            ReportOptions::new(Severity::Warning).with_element((*other).clone()),
        )?;
    }

    Ok(())
}

async fn check_image(ctx: &HintContext, icon: &Element, resource: &str) -> anyhow::Result<()> {
    let at = |severity| ReportOptions::new(severity).with_element(icon.clone());

    let href = icon.attribute("href").map(str::trim).unwrap_or_default();
    if href.is_empty() {
        ctx.report(
            resource,
            "'apple-touch-icon' should have a non-empty 'href' attribute.",
            at(Severity::Error),
        )?;
        return Ok(());
    }

    // Only HTTP(S) pages can be checked further.
    let Ok(base) = Url::parse(resource) else {
        return Ok(());
    };
    if !matches!(base.scheme(), "http" | "https") {
        return Ok(());
    }
    let Ok(icon_url) = base.join(href) else {
        ctx.report(
            resource,
            "'apple-touch-icon' could not be fetched.",
            at(Severity::Error),
        )?;
        return Ok(());
    };

    let data = match ctx.fetch_content(icon_url.as_str()).await {
        Ok(data) => data,
        Err(e) => {
            debug!(url = %icon_url, error = %e, "apple-touch-icon fetch failed");
            ctx.report(
                resource,
                "'apple-touch-icon' could not be fetched.",
                at(Severity::Error),
            )?;
            return Ok(());
        }
    };

    let status = data.response.status_code;
    if status != 200 {
        ctx.report(
            resource,
            format!("'apple-touch-icon' could not be fetched (status code: {status})."),
            at(Severity::Error),
        )?;
        return Ok(());
    }

    match png_dimensions(&data.response.body) {
        PngCheck::NotPng => {
            ctx.report(resource, "'apple-touch-icon' should be a PNG file.", at(Severity::Error))?;
        }
        PngCheck::Invalid => {
            ctx.report(resource, "'apple-touch-icon' is not a valid PNG.", at(Severity::Error))?;
        }
        PngCheck::Size(width, height)
            if width != RECOMMENDED_SIZE || height != RECOMMENDED_SIZE =>
        {
            ctx.report(
                resource,
                format!(
                    "'apple-touch-icon' should be {RECOMMENDED_SIZE}x{RECOMMENDED_SIZE}px, \
                     found {width}x{height}px."
                ),
                at(Severity::Warning),
            )?;
        }
        PngCheck::Size(..) => {}
    }

    Ok(())
}

fn rel_values(element: &Element) -> Vec<String> {
    element
        .attribute("rel")
        .map(|rel| rel.split_whitespace().map(str::to_ascii_lowercase).collect())
        .unwrap_or_default()
}

fn is_apple_touch_icon(element: &Element) -> bool {
    rel_values(element)
        .iter()
        .any(|rel| rel == "apple-touch-icon" || rel == "apple-touch-icon-precomposed")
}

/// Prefer a 180x180 icon, then one without `sizes`, then the first.
fn choose_best_icon<'a>(icons: &[&'a Element]) -> Option<&'a Element> {
    let mut unsized_icon = None;
    for icon in icons {
        match icon.attribute("sizes").map(|s| s.trim().to_ascii_lowercase()) {
            Some(sizes) if sizes == "180x180" => return Some(*icon),
            Some(sizes) if !sizes.is_empty() => {}
            _ => {
                unsized_icon.get_or_insert(*icon);
            }
        }
    }
    unsized_icon.or_else(|| icons.first().copied())
}

#[derive(Debug, PartialEq, Eq)]
enum PngCheck {
    NotPng,
    Invalid,
    Size(u32, u32),
}

/// Width and height from the IHDR chunk.
fn png_dimensions(body: &[u8]) -> PngCheck {
    if !body.starts_with(&PNG_SIGNATURE) {
        return PngCheck::NotPng;
    }
    let Some(ihdr) = body.get(12..24) else {
        return PngCheck::Invalid;
    };
    if &ihdr[..4] != b"IHDR" {
        return PngCheck::Invalid;
    }
    let width = u32::from_be_bytes([ihdr[4], ihdr[5], ihdr[6], ihdr[7]]);
    let height = u32::from_be_bytes([ihdr[8], ihdr[9], ihdr[10], ihdr[11]]);
    PngCheck::Size(width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use hint_core::testing::MockTransport;
    use hint_core::{Document, HintConfig, Orchestrator, Report, Response};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
        bytes
    }

    fn link(rel: &str, href: &str) -> Element {
        Element::new("link")
            .with_attribute("rel", rel)
            .with_attribute("href", href)
    }

    async fn audit(transport: MockTransport, elements: Vec<Element>) -> Report {
        let events = vec![
            Ok(Event::ParseEnd {
                resource: "https://x/".into(),
                document: Document::new(elements),
            }),
            Ok(Event::TraverseEnd {
                resource: "https://x/".into(),
            }),
        ];

        Orchestrator::new(HintConfig::new(), transport)
            .with_rule(AppleTouchIcons)
            .run("https://x/", stream::iter(events))
            .await
            .unwrap()
    }

    fn messages(report: &Report) -> Vec<&str> {
        report.findings().iter().map(|f| f.message.as_str()).collect()
    }

    #[test]
    fn test_png_dimensions() {
        assert_eq!(png_dimensions(&png(180, 180)), PngCheck::Size(180, 180));
        assert_eq!(png_dimensions(b"GIF89a"), PngCheck::NotPng);
        assert_eq!(png_dimensions(&PNG_SIGNATURE), PngCheck::Invalid);
    }

    #[test]
    fn test_best_icon_prefers_recommended_size() {
        let small = link("apple-touch-icon", "/57.png").with_attribute("sizes", "57x57");
        let plain = link("apple-touch-icon", "/plain.png");
        let large = link("apple-touch-icon", "/180.png").with_attribute("sizes", "180x180");

        assert_eq!(choose_best_icon(&[&small, &plain, &large]), Some(&large));
        assert_eq!(choose_best_icon(&[&small, &plain]), Some(&plain));
        assert_eq!(choose_best_icon(&[&small]), Some(&small));
        assert_eq!(choose_best_icon(&[]), None);
    }

    #[tokio::test]
    async fn test_valid_icon_has_no_findings() {
        let transport = MockTransport::new()
            .with_response("https://x/icon.png", Response::new(200).with_body(png(180, 180)));

        let report = audit(transport, vec![link("apple-touch-icon", "/icon.png")]).await;

        assert!(report.is_empty(), "{:?}", messages(&report));
    }

    #[tokio::test]
    async fn test_missing_icon_only_reported_with_manifest() {
        let without_manifest = audit(MockTransport::new(), vec![Element::new("html")]).await;
        let with_manifest = audit(
            MockTransport::new(),
            vec![link("manifest", "/site.webmanifest")],
        )
        .await;

        assert!(without_manifest.is_empty());
        assert_eq!(messages(&with_manifest), vec!["'apple-touch-icon' was not specified."]);
    }

    #[tokio::test]
    async fn test_unreachable_and_wrong_size_icons() {
        let missing =
            audit(MockTransport::new(), vec![link("apple-touch-icon", "/gone.png")]).await;
        assert_eq!(
            messages(&missing),
            vec!["'apple-touch-icon' could not be fetched (status code: 404)."]
        );

        let transport = MockTransport::new()
            .with_response("https://x/small.png", Response::new(200).with_body(png(57, 57)));
        let small = audit(transport, vec![link("apple-touch-icon-precomposed", "small.png")]).await;
        assert_eq!(
            messages(&small),
            vec![
                "'apple-touch-icon' should use 'rel=\"apple-touch-icon\"'.",
                "'apple-touch-icon' should be 180x180px, found 57x57px.",
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_icons_are_reported() {
        let transport = MockTransport::new()
            .with_response("https://x/a.png", Response::new(200).with_body(png(180, 180)));

        let report = audit(
            transport,
            vec![
                link("apple-touch-icon", "/a.png"),
                link("apple-touch-icon", "/b.png").with_attribute("sizes", "120x120"),
            ],
        )
        .await;

        assert_eq!(messages(&report), vec!["'apple-touch-icon' is already specified."]);
        assert_eq!(
            report.findings()[0].element.as_ref().and_then(|e| e.attribute("href")),
            Some("/b.png")
        );
    }
}
