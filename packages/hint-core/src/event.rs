//! Lifecycle events published to rules.
//!
//! Each variant maps to one topic. Fetch events carry the resource kind as
//! the last topic segment, so rules can subscribe to `fetch::end::html` or
//! to every kind with `fetch::end::*`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dom::{Document, Element};
use crate::error::FetchError;
use crate::network::{Hop, Request, Response};
use crate::topic::Topic;

/// Kind of resource a fetch produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Html,
    Script,
    Css,
    Image,
    Font,
    Manifest,
    Json,
    Txt,
    #[default]
    Unknown,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Html => "html",
            ResourceKind::Script => "script",
            ResourceKind::Css => "css",
            ResourceKind::Image => "image",
            ResourceKind::Font => "font",
            ResourceKind::Manifest => "manifest",
            ResourceKind::Json => "json",
            ResourceKind::Txt => "txt",
            ResourceKind::Unknown => "unknown",
        }
    }

    /// Best-effort classification from a media type.
    pub fn from_media_type(media_type: &str) -> Self {
        let media_type = media_type.trim().to_ascii_lowercase();
        match media_type.as_str() {
            "text/html" | "application/xhtml+xml" => ResourceKind::Html,
            "text/css" => ResourceKind::Css,
            "application/manifest+json" => ResourceKind::Manifest,
            "application/json" => ResourceKind::Json,
            "text/plain" => ResourceKind::Txt,
            "text/javascript" | "application/javascript" | "application/x-javascript" => {
                ResourceKind::Script
            }
            m if m.starts_with("image/") => ResourceKind::Image,
            m if m.starts_with("font/") || m.starts_with("application/font-") => {
                ResourceKind::Font
            }
            _ => ResourceKind::Unknown,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `fetch::end::<kind>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchEnd {
    pub resource: String,
    #[serde(default)]
    pub kind: ResourceKind,
    pub request: Request,
    pub response: Response,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Element>,
}

/// Payload of `fetch::error::<kind>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailed {
    pub resource: String,
    #[serde(default)]
    pub kind: ResourceKind,
    pub error: FetchError,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Element>,
    #[serde(default)]
    pub hops: Vec<Hop>,
}

/// An immutable lifecycle notification. Read-only to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    ScanStart { resource: String },
    FetchStart { resource: String },
    FetchEnd(FetchEnd),
    FetchError(FetchFailed),
    ParseEnd { resource: String, document: Document },
    TraverseStart { resource: String },
    ElementSeen { resource: String, element: Element },
    TraverseEnd { resource: String },
    ScanEnd { resource: String },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::ScanStart { .. } => Topic::from_segments(["scan", "start"]),
            Event::FetchStart { .. } => Topic::from_segments(["fetch", "start"]),
            Event::FetchEnd(end) => Topic::from_segments(["fetch", "end", end.kind.as_str()]),
            Event::FetchError(failed) => {
                Topic::from_segments(["fetch", "error", failed.kind.as_str()])
            }
            Event::ParseEnd { .. } => Topic::from_segments(["parse", "end", "html"]),
            Event::TraverseStart { .. } => Topic::from_segments(["traverse", "start"]),
            Event::ElementSeen { element, .. } => {
                Topic::from_segments(["element", element.node_name.as_str()])
            }
            Event::TraverseEnd { .. } => Topic::from_segments(["traverse", "end"]),
            Event::ScanEnd { .. } => Topic::from_segments(["scan", "end"]),
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            Event::ScanStart { resource }
            | Event::FetchStart { resource }
            | Event::ParseEnd { resource, .. }
            | Event::TraverseStart { resource }
            | Event::ElementSeen { resource, .. }
            | Event::TraverseEnd { resource }
            | Event::ScanEnd { resource } => resource,
            Event::FetchEnd(end) => &end.resource,
            Event::FetchError(failed) => &failed.resource,
        }
    }

    /// `traverse::end` closes the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::TraverseEnd { .. })
    }
}
