use thiserror::Error;

use crate::models::{GenerationId, Partition};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("No cached entry for {0}")]
    CacheMiss(String),

    #[error("Population of generation {generation} failed on partition {partition}: {reason}")]
    PopulationFailed {
        generation: GenerationId,
        partition: Partition,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unknown generation: {0}")]
    UnknownGeneration(GenerationId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error details carried in messages
const MAX_ERROR_DETAIL_LENGTH: usize = 300;

impl CacheError {
    fn truncate_detail(detail: &str) -> String {
        if detail.len() <= MAX_ERROR_DETAIL_LENGTH {
            detail.to_string()
        } else {
            let cut: String = detail.chars().take(MAX_ERROR_DETAIL_LENGTH).collect();
            format!("{}... (truncated, {} total bytes)", cut, detail.len())
        }
    }

    pub fn storage(detail: impl std::fmt::Display) -> Self {
        CacheError::Storage(Self::truncate_detail(&detail.to_string()))
    }

    pub fn network(detail: impl std::fmt::Display) -> Self {
        CacheError::NetworkUnavailable(Self::truncate_detail(&detail.to_string()))
    }

    /// Stable machine-readable kind, used in offline payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::NetworkUnavailable(_) => "network_unavailable",
            CacheError::CacheMiss(_) => "cache_miss",
            CacheError::PopulationFailed { .. } => "population_failed",
            CacheError::Storage(_) => "storage_error",
            CacheError::UnknownGeneration(_) => "unknown_generation",
            CacheError::InvalidState(_) => "invalid_state",
            CacheError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::storage(e)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::storage(e)
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_details_are_truncated() {
        let detail = "x".repeat(1000);
        let err = CacheError::storage(&detail);
        let msg = err.to_string();
        assert!(msg.contains("truncated, 1000 total bytes"));
        assert!(msg.len() < 400);
    }

    #[test]
    fn test_kinds_are_distinct() {
        let errors = [
            CacheError::network("down"),
            CacheError::CacheMiss("GET /".to_string()),
            CacheError::storage("disk"),
            CacheError::UnknownGeneration(GenerationId(7)),
        ];
        let kinds: std::collections::HashSet<_> = errors.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let err: CacheError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.kind(), "storage_error");
    }
}
