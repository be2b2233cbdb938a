//! offlinecache core library.
//!
//! An offline-capable resource cache that sits in front of every outbound
//! request of a client application:
//!
//! - `classifier`: request → resource class (api, static asset, other)
//! - `strategy`: cache-first, network-first and stale-while-revalidate
//! - `generation`: versioned cache snapshots with atomic cutover and GC
//! - `lifecycle`: install → waiting → active, plus control messages
//! - `sync`: deferred replay of mutating requests after connectivity returns
//! - `push`: push payloads to notifications and click routing
//!
//! `CacheManager` wires them together over injected collaborators: a
//! `CacheStore`, a `NetworkClient` and a `Clock`.

pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod generation;
pub mod lifecycle;
pub mod manager;
pub mod models;
pub mod network;
pub mod push;
pub mod store;
pub mod strategy;
pub mod sync;
#[doc(hidden)]
pub mod testing;

mod utils;

pub use classifier::{Classification, ClassifierRules, PassthroughReason, RequestClass, RequestClassifier, Strategy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use generation::{GcReport, Generation, GenerationManager, GenerationStatus};
pub use lifecycle::{ControlMessage, Deployment, LifecycleState};
pub use manager::CacheManager;
pub use models::{
    BucketName, CacheEntry, CacheKey, GenerationId, Partition, Request, Response, ResponseSource,
    Served,
};
pub use network::{HttpClient, NetworkClient};
pub use push::{NavigationIntent, NotificationAction, NotificationDescriptor, PushDefaults, PushRouter};
pub use store::{CacheStore, FileStore, MemoryStore};
pub use strategy::{RevalidationOutcome, RevalidationResult};
pub use sync::{SyncReport, SyncTask};
