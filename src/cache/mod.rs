//! Coursebook cache tier.
//!
//! Holds the course-group hierarchy snapshot served by
//! [`AggregateCache`](crate::application::hierarchy::AggregateCache).
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_hours = 24
//! ```

mod config;
mod lock;
mod store;

pub use config::{CacheConfig, MAX_TTL_HOURS};
pub(crate) use lock::mutex_lock;
pub use store::{
    CacheError, CachedHierarchy, HIERARCHY_KEY, InMemorySnapshotBackend, SnapshotBackend,
};
