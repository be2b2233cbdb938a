//! Response snapshots and the provenance attached to every served response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::describe_age;
use super::request::CacheKey;
use crate::classifier::RequestClass;
use crate::error::CacheError;

/// Header stamped on synthesized responses.
pub const SYNTHETIC_HEADER: &str = "x-offlinecache";

/// HTTP status used for every synthesized offline response.
pub const OFFLINE_STATUS: u16 = 503;

/// HTTP status used when a mutating request was queued for replay.
pub const QUEUED_STATUS: u16 = 202;

/// Immutable response snapshot: status, headers and body bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Cache-first miss with no network: non-2xx, labeled as a miss.
    pub fn unavailable(key: &CacheKey) -> Self {
        let body = serde_json::json!({
            "error": "unavailable",
            "kind": "cache_miss",
            "key": key.as_str(),
        });
        Self::new(OFFLINE_STATUS, body.to_string())
            .with_header("content-type", "application/json")
            .with_header(SYNTHETIC_HEADER, "miss")
    }

    /// Structured offline payload for "truly no data".
    pub fn offline(key: &CacheKey, cause: &CacheError) -> Self {
        let body = serde_json::json!({
            "error": "offline",
            "kind": cause.kind(),
            "key": key.as_str(),
            "message": cause.to_string(),
        });
        Self::new(OFFLINE_STATUS, body.to_string())
            .with_header("content-type", "application/json")
            .with_header(SYNTHETIC_HEADER, "offline")
    }

    /// Acknowledgement for a mutating request deferred to background sync.
    pub fn queued(tag: &str) -> Self {
        let body = serde_json::json!({
            "error": "offline",
            "kind": "queued",
            "tag": tag,
        });
        Self::new(QUEUED_STATUS, body.to_string())
            .with_header("content-type", "application/json")
            .with_header(SYNTHETIC_HEADER, "queued")
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Fresh from the network
    Network,
    /// Served from cache without consulting the network first
    Cache,
    /// Served from cache because the network failed
    Stale,
    /// Synthesized: no network and nothing cached
    Offline,
    /// Not eligible for caching; forwarded to the network untouched
    Passthrough,
    /// Mutating request deferred to background sync
    Queued,
}

/// A response handed back to the caller together with its provenance.
#[derive(Debug, Clone)]
pub struct Served {
    pub response: Response,
    pub source: ResponseSource,
    pub class: Option<RequestClass>,
    /// When the response was stored (cache-served responses only)
    pub stored_at: Option<DateTime<Utc>>,
}

impl Served {
    pub fn from_network(response: Response, class: Option<RequestClass>) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
            class,
            stored_at: None,
        }
    }

    pub fn from_cache(
        response: Response,
        class: RequestClass,
        stored_at: DateTime<Utc>,
        is_stale: bool,
    ) -> Self {
        Self {
            response,
            source: if is_stale {
                ResponseSource::Stale
            } else {
                ResponseSource::Cache
            },
            class: Some(class),
            stored_at: Some(stored_at),
        }
    }

    pub fn synthesized(response: Response, source: ResponseSource, class: Option<RequestClass>) -> Self {
        Self {
            response,
            source,
            class,
            stored_at: None,
        }
    }

    pub fn passthrough(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Passthrough,
            class: None,
            stored_at: None,
        }
    }

    /// How old the cached copy is, e.g. `5m ago`; `None` for live responses.
    pub fn age_display(&self, now: DateTime<Utc>) -> Option<String> {
        self.stored_at.map(|stored_at| describe_age(stored_at, now))
    }

    /// True when the caller got no real data and should render an offline state.
    pub fn is_offline(&self) -> bool {
        matches!(self.source, ResponseSource::Offline | ResponseSource::Queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_payload_is_structured() {
        let key = CacheKey::from("GET https://example.com/api/status");
        let response = Response::offline(&key, &CacheError::network("connection refused"));
        assert_eq!(response.status, OFFLINE_STATUS);
        assert_eq!(response.header(SYNTHETIC_HEADER), Some("offline"));

        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], "offline");
        assert_eq!(body["kind"], "network_unavailable");
        assert_eq!(body["key"], "GET https://example.com/api/status");
    }

    #[test]
    fn test_unavailable_is_labeled_miss() {
        let key = CacheKey::from("GET https://example.com/static/app.js");
        let response = Response::unavailable(&key);
        assert!(!response.is_success());
        assert_eq!(response.header("X-OfflineCache"), Some("miss"));
    }

    #[test]
    fn test_age_display_only_for_cached_responses() {
        let now = Utc::now();
        let cached = Served::from_cache(
            Response::new(200, "ok"),
            RequestClass::StaticAsset,
            now - chrono::Duration::minutes(7),
            false,
        );
        assert_eq!(cached.age_display(now).as_deref(), Some("7m ago"));

        let live = Served::from_network(Response::new(200, "ok"), Some(RequestClass::Api));
        assert_eq!(live.age_display(now), None);
    }

    #[test]
    fn test_queued_carries_tag() {
        let response = Response::queued("sync-orders");
        assert_eq!(response.status, QUEUED_STATUS);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["tag"], "sync-orders");
    }

    #[test]
    fn test_served_source_flags() {
        let now = Utc::now();
        let stale = Served::from_cache(Response::new(200, "x"), RequestClass::Api, now, true);
        assert_eq!(stale.source, ResponseSource::Stale);
        assert!(!stale.is_offline());

        let fresh = Served::from_cache(Response::new(200, "x"), RequestClass::Other, now, false);
        assert_eq!(fresh.source, ResponseSource::Cache);
    }
}
