//! Request descriptors and canonical cache keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CacheError, Result};

/// Header used to carry an explicit background-sync tag on mutating requests.
pub const SYNC_TAG_HEADER: &str = "x-sync-tag";

/// An outbound request as seen by the interception layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub url: Url,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: &str, url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| CacheError::InvalidRequest(format!("{}: {}", url, e)))?;
        Ok(Self {
            method: method.trim().to_ascii_uppercase(),
            url,
            headers: Vec::new(),
            body: Vec::new(),
        })
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new("GET", url)
    }

    pub fn post(url: &str, body: impl Into<Vec<u8>>) -> Result<Self> {
        let mut request = Self::new("POST", url)?;
        request.body = body.into();
        Ok(request)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_sync_tag(self, tag: &str) -> Self {
        self.with_header(SYNC_TAG_HEADER, tag)
    }

    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// GET and HEAD are the only methods the cache ever answers.
    pub fn is_read_only(&self) -> bool {
        matches!(self.method.as_str(), "GET" | "HEAD")
    }

    pub fn is_network_scheme(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }

    /// Tag under which a failed mutating request is queued for replay.
    ///
    /// An explicit `x-sync-tag` header wins; otherwise the tag is derived from
    /// the last non-empty path segment, e.g. `POST /api/order` -> `sync-order`.
    pub fn sync_tag(&self) -> String {
        if let Some(tag) = self.header(SYNC_TAG_HEADER) {
            let tag = tag.trim();
            if !tag.is_empty() {
                return tag.to_string();
            }
        }

        let segment = self
            .url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .unwrap_or("root")
            .to_ascii_lowercase();
        format!("sync-{}", segment)
    }

    /// Canonical identity for storage lookups.
    pub fn cache_key(&self, vary_headers: &[String]) -> CacheKey {
        CacheKey::for_request(self, vary_headers)
    }
}

/// Canonical request identity: method, normalized URL and variation axes.
///
/// The URL is normalized by the parser (lowercase scheme and host, default
/// port dropped); the fragment is removed and the query string kept verbatim
/// so distinct queries stay distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(request: &Request, vary_headers: &[String]) -> Self {
        let mut url = request.url.clone();
        url.set_fragment(None);

        let mut key = format!("{} {}", request.method, url);
        for name in vary_headers {
            if let Some(value) = request.header(name) {
                key.push_str(&format!(" |{}={}", name.to_ascii_lowercase(), value.trim()));
            }
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
