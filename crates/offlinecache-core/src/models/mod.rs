//! Domain models shared by every component.
//!
//! Requests and responses are kept as plain owned snapshots so they can be
//! stored, cloned into background tasks and replayed later.

pub mod entry;
pub mod request;
pub mod response;

pub use entry::{describe_age, BucketName, CacheEntry, GenerationId, Partition};
pub use request::{CacheKey, Request, SYNC_TAG_HEADER};
pub use response::{Response, ResponseSource, Served, OFFLINE_STATUS, QUEUED_STATUS, SYNTHETIC_HEADER};
