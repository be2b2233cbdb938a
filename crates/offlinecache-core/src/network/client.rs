use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::models::{Request, Response, SYNC_TAG_HEADER};

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Transport used for every outbound fetch.
///
/// Implementations return `Ok` for any HTTP status and reserve
/// `CacheError::NetworkUnavailable` for transport failures. The returned
/// response must be complete: the body is fully read before returning.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// reqwest-backed network client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::InvalidState(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn build_headers(request: &Request) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        for (name, value) in &request.headers {
            // Routing metadata for the sync queue, never sent upstream
            if name.eq_ignore_ascii_case(SYNC_TAG_HEADER) {
                continue;
            }
            let parsed = (
                header::HeaderName::from_bytes(name.as_bytes()),
                header::HeaderValue::from_str(value),
            );
            match parsed {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!(header = %name, "Skipping invalid request header"),
            }
        }
        headers
    }
}

#[async_trait]
impl NetworkClient for HttpClient {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| CacheError::InvalidRequest(format!("{}: {}", request.method, e)))?;

        let mut builder = self
            .client
            .request(method, request.url.clone())
            .headers(Self::build_headers(request));
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| send_error(request, e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        // A body cut off mid-stream is a transport failure, never a partial response
        let body = response.bytes().await.map_err(|e| {
            CacheError::network(format!("Failed to read body from {}: {}", request.url, e))
        })?;

        debug!(url = %request.url, status, bytes = body.len(), "Fetched");

        Ok(Response {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Only connect failures and timeouts mean "offline"; anything else (bad
/// scheme, redirect loop, builder errors) would fail again on replay.
fn send_error(request: &Request, e: reqwest::Error) -> CacheError {
    let detail = format!("{} {}: {}", request.method, request.url, e);
    if e.is_connect() || e.is_timeout() {
        CacheError::network(detail)
    } else {
        CacheError::InvalidRequest(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_tag_header_is_not_forwarded() {
        let request = Request::post("https://example.com/api/order", "{}")
            .unwrap()
            .with_header("content-type", "application/json")
            .with_sync_tag("sync-orders");
        let headers = HttpClient::build_headers(&request);
        assert!(headers.get(SYNC_TAG_HEADER).is_none());
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
    }

    #[test]
    fn test_invalid_headers_are_skipped() {
        let request = Request::get("https://example.com/")
            .unwrap()
            .with_header("bad header", "x")
            .with_header("accept", "text/html");
        let headers = HttpClient::build_headers(&request);
        assert_eq!(headers.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_unavailable() {
        let client = HttpClient::with_timeout(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) on loopback is closed on test machines
        let request = Request::get("http://127.0.0.1:9/").unwrap();
        let err = client.fetch(&request).await.unwrap_err();
        assert_eq!(err.kind(), "network_unavailable");
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_invalid_request() {
        let client = HttpClient::new().unwrap();
        let request = Request::post("ftp://example.com/upload", "x").unwrap();
        let err = client.fetch(&request).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }
}
