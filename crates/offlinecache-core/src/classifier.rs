//! Request classification.
//!
//! Maps every intercepted request to the strategy and partition that serve
//! it. Classification is a pure function of the request descriptor: it never
//! blocks and never touches the cache.

use serde::{Deserialize, Serialize};

use crate::models::{Partition, Request};

/// Resource class derived from the request URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "kebab-case")]
pub enum RequestClass {
    /// State-changing or freshness-critical endpoints
    Api,
    /// Immutable or long-lived assets
    StaticAsset,
    Other,
}

/// Lookup-vs-fetch ordering applied to a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl RequestClass {
    pub fn strategy(&self) -> Strategy {
        match self {
            RequestClass::StaticAsset => Strategy::CacheFirst,
            RequestClass::Api => Strategy::NetworkFirst,
            RequestClass::Other => Strategy::StaleWhileRevalidate,
        }
    }

    pub fn partition(&self) -> Partition {
        match self {
            RequestClass::StaticAsset => Partition::Static,
            RequestClass::Api => Partition::Api,
            RequestClass::Other => Partition::Dynamic,
        }
    }
}

/// Why a request bypasses the cache entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// Not http/https (data:, blob:, chrome-extension:, ...)
    NonNetworkScheme,
    /// Anything other than GET/HEAD
    Mutating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Passthrough(PassthroughReason),
    Cached(RequestClass),
}

/// Configurable matching rules. All matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    pub api_prefixes: Vec<String>,
    pub static_prefixes: Vec<String>,
    pub static_extensions: Vec<String>,
    pub cdn_hosts: Vec<String>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            api_prefixes: strings(&["/api/"]),
            static_prefixes: strings(&["/static/", "/assets/"]),
            static_extensions: strings(&[
                "js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot", "png", "jpg", "jpeg",
                "gif", "svg", "webp", "ico",
            ]),
            cdn_hosts: strings(&[
                "cdn.jsdelivr.net",
                "unpkg.com",
                "cdnjs.cloudflare.com",
                "fonts.googleapis.com",
                "fonts.gstatic.com",
            ]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestClassifier {
    api_prefixes: Vec<String>,
    static_prefixes: Vec<String>,
    static_extensions: Vec<String>,
    cdn_hosts: Vec<String>,
}

impl RequestClassifier {
    pub fn new(rules: &ClassifierRules) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| s.trim().to_ascii_lowercase()).collect()
        };
        Self {
            api_prefixes: lower(&rules.api_prefixes),
            static_prefixes: lower(&rules.static_prefixes),
            static_extensions: rules
                .static_extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            cdn_hosts: lower(&rules.cdn_hosts),
        }
    }

    /// Classify a request. Checks run in priority order: scheme, method,
    /// API prefix, static-asset patterns, then the `Other` fallback.
    pub fn classify(&self, request: &Request) -> Classification {
        if !request.is_network_scheme() {
            return Classification::Passthrough(PassthroughReason::NonNetworkScheme);
        }
        if !request.is_read_only() {
            return Classification::Passthrough(PassthroughReason::Mutating);
        }

        // Url::path() never includes the query string
        let path = request.url.path().to_ascii_lowercase();

        if self.matches_api(&path) {
            return Classification::Cached(RequestClass::Api);
        }
        if self.matches_static(request, &path) {
            return Classification::Cached(RequestClass::StaticAsset);
        }
        Classification::Cached(RequestClass::Other)
    }

    fn matches_api(&self, path: &str) -> bool {
        self.api_prefixes.iter().any(|prefix| {
            path.starts_with(prefix.as_str())
                // "/api/" also claims the bare "/api"
                || (prefix.ends_with('/') && path == prefix.trim_end_matches('/'))
        })
    }

    fn matches_static(&self, request: &Request, path: &str) -> bool {
        if let Some(host) = request.url.host_str() {
            let host = host.to_ascii_lowercase();
            if self.cdn_hosts.iter().any(|h| *h == host) {
                return true;
            }
        }

        if self.static_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return true;
        }

        let file_name = path.rsplit('/').next().unwrap_or("");
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                self.static_extensions.iter().any(|e| e == ext)
            }
            _ => false,
        }
    }
}

impl Default for RequestClassifier {
    fn default() -> Self {
        Self::new(&ClassifierRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(method: &str, url: &str) -> Classification {
        RequestClassifier::default().classify(&Request::new(method, url).unwrap())
    }

    #[test]
    fn test_mutating_requests_pass_through_before_anything_else() {
        assert_eq!(
            classify("POST", "https://example.com/api/order"),
            Classification::Passthrough(PassthroughReason::Mutating)
        );
        assert_eq!(
            classify("DELETE", "https://example.com/static/app.js"),
            Classification::Passthrough(PassthroughReason::Mutating)
        );
    }

    #[test]
    fn test_non_network_scheme_passes_through() {
        assert_eq!(
            classify("GET", "data:text/plain,hello"),
            Classification::Passthrough(PassthroughReason::NonNetworkScheme)
        );
    }

    #[test]
    fn test_api_prefix_wins_over_static_extension() {
        assert_eq!(
            classify("GET", "https://example.com/api/report.css"),
            Classification::Cached(RequestClass::Api)
        );
        assert_eq!(
            classify("GET", "https://example.com/API/Status?x=1"),
            Classification::Cached(RequestClass::Api)
        );
        assert_eq!(
            classify("GET", "https://example.com/api"),
            Classification::Cached(RequestClass::Api)
        );
        assert_eq!(
            classify("GET", "https://example.com/apiary"),
            Classification::Cached(RequestClass::Other)
        );
    }

    #[test]
    fn test_static_assets() {
        for url in [
            "https://example.com/static/app.js",
            "https://example.com/css/site.CSS?v=3",
            "https://example.com/fonts/inter.woff2",
            "https://cdn.jsdelivr.net/npm/chart.js",
            "https://example.com/assets/logo",
        ] {
            assert_eq!(
                classify("GET", url),
                Classification::Cached(RequestClass::StaticAsset),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_query_string_does_not_affect_extension_match() {
        assert_eq!(
            classify("GET", "https://example.com/page?file=app.js"),
            Classification::Cached(RequestClass::Other)
        );
    }

    #[test]
    fn test_dotfiles_and_pages_are_other() {
        assert_eq!(
            classify("GET", "https://example.com/.js"),
            Classification::Cached(RequestClass::Other)
        );
        assert_eq!(
            classify("GET", "https://example.com/dashboard"),
            Classification::Cached(RequestClass::Other)
        );
        assert_eq!(
            classify("HEAD", "https://example.com/"),
            Classification::Cached(RequestClass::Other)
        );
    }

    #[test]
    fn test_class_dispatch_is_closed() {
        assert_eq!(RequestClass::StaticAsset.strategy(), Strategy::CacheFirst);
        assert_eq!(RequestClass::Api.strategy(), Strategy::NetworkFirst);
        assert_eq!(RequestClass::Other.strategy(), Strategy::StaleWhileRevalidate);
        assert_eq!(RequestClass::StaticAsset.partition(), Partition::Static);
        assert_eq!(RequestClass::Api.partition(), Partition::Api);
        assert_eq!(RequestClass::Other.partition(), Partition::Dynamic);
    }

    #[test]
    fn test_custom_rules() {
        let rules = ClassifierRules {
            api_prefixes: vec!["/v2/".to_string()],
            static_extensions: vec![".wasm".to_string()],
            ..Default::default()
        };
        let classifier = RequestClassifier::new(&rules);
        let req = Request::get("https://example.com/v2/items").unwrap();
        assert_eq!(classifier.classify(&req), Classification::Cached(RequestClass::Api));
        let req = Request::get("https://example.com/pkg/app.wasm").unwrap();
        assert_eq!(
            classifier.classify(&req),
            Classification::Cached(RequestClass::StaticAsset)
        );
        let req = Request::get("https://example.com/api/items").unwrap();
        assert_eq!(classifier.classify(&req), Classification::Cached(RequestClass::Other));
    }
}
