//! Request/response data shared by fetch events and the fetch cache.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FetchError, FetchResult};

/// Header map with lowercased names.
pub type HttpHeaders = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Head => f.write_str("HEAD"),
        }
    }
}

/// Canonical identity of a fetch: absolute URL (without fragment) + method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    url: Url,
    method: Method,
}

impl FetchKey {
    pub fn new(url: &str, method: Method) -> FetchResult<Self> {
        let mut parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        parsed.set_fragment(None);

        Ok(Self {
            url: parsed,
            method,
        })
    }

    pub fn get(url: &str) -> FetchResult<Self> {
        Self::new(url, Method::Get)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub headers: HttpHeaders,
}

impl Request {
    pub fn new(url: impl Into<String>, method: Method) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HttpHeaders::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }
}

/// One redirect response followed on the way to the final response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    /// URL that answered with the redirect
    pub url: String,
    pub status_code: u16,
}

/// Ordered redirect hops for one fetch.
///
/// Only the fetch cache appends to a chain; once the final response is
/// recorded the chain is read-only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RedirectChain {
    hops: Vec<Hop>,
}

impl RedirectChain {
    pub(crate) fn push(&mut self, hop: Hop) {
        self.hops.push(hop);
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Hop> {
        self.hops.iter()
    }
}

impl From<Vec<Hop>> for RedirectChain {
    fn from(hops: Vec<Hop>) -> Self {
        Self { hops }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Final URL after redirects
    #[serde(default)]
    pub url: String,
    pub status_code: u16,
    #[serde(default)]
    pub headers: HttpHeaders,
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub hops: RedirectChain,
}

impl Response {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Header lookup by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Media type from `Content-Type`, without parameters.
    pub fn media_type(&self) -> Option<String> {
        self.header("content-type").and_then(|value| {
            let media = value.split(';').next()?.trim().to_ascii_lowercase();
            (!media.is_empty()).then_some(media)
        })
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status_code, 301 | 302 | 303 | 307 | 308)
    }
}

/// Resolved outcome of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkData {
    /// The request as originally issued (before redirects)
    pub request: Request,
    pub response: Response,
}
