//! Snapshot storage backends.
//!
//! The hierarchy cache talks to a [`SnapshotBackend`] so that an in-process
//! map and a remote key-value service are interchangeable.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::application::digest::SnapshotDigest;
use crate::domain::entities::CourseGroupRecord;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Key of the full course-group hierarchy entry.
pub const HIERARCHY_KEY: &str = "coursebook:course_groups";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {message}")]
    Unavailable { message: String },
}

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// A populated hierarchy entry: the groups exactly as loaded plus the digest
/// computed over them.
#[derive(Debug, Clone)]
pub struct CachedHierarchy {
    pub groups: Arc<Vec<CourseGroupRecord>>,
    pub digest: SnapshotDigest,
}

#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedHierarchy>, CacheError>;

    /// Digest of the entry without handing out the payload.
    async fn digest(&self, key: &str) -> Result<Option<SnapshotDigest>, CacheError>;

    async fn put(&self, key: &str, entry: CachedHierarchy, ttl: Duration)
    -> Result<(), CacheError>;

    /// Drops the entry. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

struct Slot {
    entry: CachedHierarchy,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local backend. Expired entries read as absent and are replaced on
/// the next `put`.
#[derive(Default)]
pub struct InMemorySnapshotBackend {
    slots: RwLock<HashMap<String, Slot>>,
}

impl InMemorySnapshotBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        rw_read(&self.slots, SOURCE, "len")
            .values()
            .filter(|slot| slot.live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotBackend for InMemorySnapshotBackend {
    async fn get(&self, key: &str) -> Result<Option<CachedHierarchy>, CacheError> {
        let now = Instant::now();
        Ok(rw_read(&self.slots, SOURCE, "get")
            .get(key)
            .filter(|slot| slot.live(now))
            .map(|slot| slot.entry.clone()))
    }

    async fn digest(&self, key: &str) -> Result<Option<SnapshotDigest>, CacheError> {
        let now = Instant::now();
        Ok(rw_read(&self.slots, SOURCE, "digest")
            .get(key)
            .filter(|slot| slot.live(now))
            .map(|slot| slot.entry.digest.clone()))
    }

    async fn put(
        &self,
        key: &str,
        entry: CachedHierarchy,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Instant::now().checked_add(ttl);
        rw_write(&self.slots, SOURCE, "put").insert(key.to_string(), Slot { entry, expires_at });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        rw_write(&self.slots, SOURCE, "remove").remove(key);
        Ok(())
    }
}
