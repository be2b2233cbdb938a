//! Generation identifiers, partitions and stored cache entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::CacheKey;
use super::response::Response;

/// Monotonically increasing generation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenerationId(pub u64);

impl GenerationId {
    pub fn next(self) -> Self {
        GenerationId(self.0 + 1)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Named subdivision of a generation, one per resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Static,
    Dynamic,
    Api,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Partition::Static, Partition::Dynamic, Partition::Api];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Static => "static",
            Partition::Dynamic => "dynamic",
            Partition::Api => "api",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(Partition::Static),
            "dynamic" => Ok(Partition::Dynamic),
            "api" => Ok(Partition::Api),
            other => Err(format!("unknown partition '{}'", other)),
        }
    }
}

/// The storage unit owned by exactly one generation: `(generation, partition)`.
///
/// Rendered as `<cache-name>-v<generation>-<partition>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketName {
    pub cache_name: String,
    pub generation: GenerationId,
    pub partition: Partition,
}

impl BucketName {
    pub fn new(cache_name: &str, generation: GenerationId, partition: Partition) -> Self {
        Self {
            cache_name: cache_name.to_string(),
            generation,
            partition,
        }
    }

    /// Parse a rendered bucket name. Names from other caches yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let (rest, partition) = name.rsplit_once('-')?;
        let (cache_name, generation) = rest.rsplit_once("-v")?;
        if cache_name.is_empty() {
            return None;
        }
        Some(Self {
            cache_name: cache_name.to_string(),
            generation: GenerationId(generation.parse().ok()?),
            partition: partition.parse().ok()?,
        })
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.cache_name, self.generation, self.partition)
    }
}

/// An immutable response snapshot filed under its canonical request key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub response: Response,
    pub partition: Partition,
    pub generation: GenerationId,
    pub stored_at: DateTime<Utc>,
}

/// Coarse human-readable age of something stored at `stored_at`.
pub fn describe_age(stored_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - stored_at).num_minutes();
    if minutes < 1 {
        // Clock skew also lands here
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / 1440)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_bucket_name_roundtrip() {
        let bucket = BucketName::new("offline-cache", GenerationId(12), Partition::Dynamic);
        assert_eq!(bucket.to_string(), "offline-cache-v12-dynamic");
        assert_eq!(BucketName::parse("offline-cache-v12-dynamic"), Some(bucket));
    }

    #[test]
    fn test_bucket_name_rejects_foreign_names() {
        assert_eq!(BucketName::parse("something-else"), None);
        assert_eq!(BucketName::parse("cache-vx-static"), None);
        assert_eq!(BucketName::parse("cache-v1-images"), None);
        assert_eq!(BucketName::parse("-v1-static"), None);
    }

    #[test]
    fn test_describe_age() {
        let now = Utc::now();
        assert_eq!(describe_age(now, now), "just now");
        assert_eq!(describe_age(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(describe_age(now - Duration::hours(3), now), "3h ago");
        assert_eq!(describe_age(now - Duration::days(2), now), "2d ago");
        assert_eq!(describe_age(now + Duration::minutes(10), now), "just now");
    }

    #[test]
    fn test_generation_ordering() {
        assert!(GenerationId(2) > GenerationId(1));
        assert_eq!(GenerationId(1).next(), GenerationId(2));
    }
}
