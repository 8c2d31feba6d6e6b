//! `reqwest`-backed [`FetchTransport`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};
use crate::fetch::FetchTransport;
use crate::network::{HttpHeaders, Method, Request, Response};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_USER_AGENT: &str = concat!("hint-core/", env!("CARGO_PKG_VERSION"));

/// Sends one HTTP request per call. Redirects are never followed here; the
/// fetch cache follows them and records each hop.
///
/// ```rust,ignore
/// let transport = HttpTransport::try_new(Duration::from_secs(10))?
///     .with_user_agent("my-auditor/1.0");
/// let cache = FetchCache::new(transport);
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpTransport {
    pub fn try_new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set a custom HTTP client. It must not follow redirects.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl FetchTransport for HttpTransport {
    async fn send(&self, request: &Request) -> FetchResult<Response> {
        debug!(url = %request.url, method = %request.method, "HTTP request starting");

        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Head => self.client.head(&request.url),
        };
        let builder = request
            .headers
            .iter()
            .fold(builder, |builder, (name, value)| builder.header(name, value))
            .header(reqwest::header::USER_AGENT, &self.user_agent);

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&request.url, e))?;

        let status_code = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&request.url, e))?;

        debug!(
            url = %request.url,
            status = status_code,
            bytes = body.len(),
            "HTTP response received"
        );

        Ok(Response {
            url: request.url.clone(),
            status_code,
            headers,
            body: body.to_vec(),
            hops: Default::default(),
        })
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        warn!(url = %url, "HTTP request timed out");
        return FetchError::Timeout {
            url: url.to_string(),
        };
    }

    if e.is_builder() {
        return FetchError::InvalidUrl {
            url: url.to_string(),
        };
    }

    warn!(url = %url, error = %e, "HTTP request failed");
    FetchError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    }
}

/// Repeated headers are joined with `", "`.
fn collect_headers(headers: &reqwest::header::HeaderMap) -> HttpHeaders {
    let mut collected = HttpHeaders::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_collect_headers_joins_repeats() {
        let mut headers = HeaderMap::new();
        headers.append("Cache-Control", HeaderValue::from_static("no-cache"));
        headers.append("cache-control", HeaderValue::from_static("no-store"));
        headers.append("X-UA-Compatible", HeaderValue::from_static("IE=edge"));

        let collected = collect_headers(&headers);

        assert_eq!(collected["cache-control"], "no-cache, no-store");
        assert_eq!(collected["x-ua-compatible"], "IE=edge");
    }

    #[test]
    fn test_transport_builds_without_following_redirects() {
        let transport = HttpTransport::try_new(Duration::from_secs(5))
            .unwrap()
            .with_user_agent("test-agent");
        assert_eq!(transport.user_agent, "test-agent");
    }
}
