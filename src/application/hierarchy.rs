//! Cached course-group hierarchy with its content digest.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::{
    deadline::Deadline,
    digest::{SnapshotDigest, digest_groups},
    error::AppError,
    repos::CatalogRepo,
    retry::{RetryPolicy, with_retry},
};
use crate::cache::{CacheConfig, CachedHierarchy, HIERARCHY_KEY, SnapshotBackend};
use crate::domain::entities::CourseGroupRecord;

const SOURCE: &str = "application::hierarchy";

const METRIC_HIT: &str = "coursebook_hierarchy_cache_hit_total";
const METRIC_MISS: &str = "coursebook_hierarchy_cache_miss_total";
const METRIC_INVALIDATE: &str = "coursebook_hierarchy_cache_invalidate_total";
const METRIC_POPULATE_SKIPPED: &str = "coursebook_hierarchy_populate_skipped_total";
const METRIC_LOAD_MS: &str = "coursebook_hierarchy_load_ms";

/// The hierarchy as served to readers. Shared, never mutated.
#[derive(Debug, Clone)]
pub struct HierarchySnapshot {
    pub groups: Arc<Vec<CourseGroupRecord>>,
    pub digest: SnapshotDigest,
}

impl From<CachedHierarchy> for HierarchySnapshot {
    fn from(entry: CachedHierarchy) -> Self {
        Self {
            groups: entry.groups,
            digest: entry.digest,
        }
    }
}

/// Read-through cache over [`CatalogRepo::load_hierarchy`].
///
/// Every invalidation bumps a generation number. A loader only populates the
/// backend if the generation it started under is still current, so a load
/// that raced a committed write never overwrites the invalidation.
pub struct AggregateCache {
    catalog: Arc<dyn CatalogRepo>,
    backend: Arc<dyn SnapshotBackend>,
    config: CacheConfig,
    retry: RetryPolicy,
    generation: Mutex<u64>,
}

impl AggregateCache {
    pub fn new(
        catalog: Arc<dyn CatalogRepo>,
        backend: Arc<dyn SnapshotBackend>,
        config: CacheConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            catalog,
            backend,
            config,
            retry,
            generation: Mutex::new(0),
        }
    }

    /// Returns the hierarchy and its digest, loading it from the store on a
    /// miss. A failed load leaves the cache empty.
    pub async fn get(&self, deadline: Deadline) -> Result<HierarchySnapshot, AppError> {
        if !self.config.enabled {
            return self.load(deadline).await;
        }

        if let Some(entry) = self.backend.get(HIERARCHY_KEY).await? {
            counter!(METRIC_HIT).increment(1);
            return Ok(entry.into());
        }
        counter!(METRIC_MISS).increment(1);

        let started_under = *self.generation.lock().await;
        let snapshot = self.load(deadline).await?;
        self.populate(started_under, &snapshot).await;
        Ok(snapshot)
    }

    /// Digest of the current hierarchy. Served from the cached entry without
    /// touching the payload when present.
    pub async fn digest(&self, deadline: Deadline) -> Result<SnapshotDigest, AppError> {
        if self.config.enabled
            && let Some(digest) = self.backend.digest(HIERARCHY_KEY).await?
        {
            counter!(METRIC_HIT).increment(1);
            return Ok(digest);
        }
        Ok(self.get(deadline).await?.digest)
    }

    /// Drops the cached entry. Called after every committed write that changes
    /// the hierarchy. Backend failures are logged; the entry's TTL bounds how
    /// long a missed invalidation can serve stale data.
    pub async fn invalidate(&self) {
        let mut generation = self.generation.lock().await;
        *generation = generation.wrapping_add(1);
        counter!(METRIC_INVALIDATE).increment(1);

        if let Err(err) = self.backend.remove(HIERARCHY_KEY).await {
            warn!(
                target = SOURCE,
                error = %err,
                generation = *generation,
                "failed to remove cached hierarchy"
            );
        } else {
            debug!(target = SOURCE, generation = *generation, "hierarchy invalidated");
        }
    }

    /// Invalidates and reloads eagerly.
    pub async fn refresh(&self, deadline: Deadline) -> Result<HierarchySnapshot, AppError> {
        self.invalidate().await;
        let snapshot = self.get(deadline).await?;
        info!(
            target = SOURCE,
            groups = snapshot.groups.len(),
            digest = %snapshot.digest,
            "hierarchy refreshed"
        );
        Ok(snapshot)
    }

    async fn load(&self, deadline: Deadline) -> Result<HierarchySnapshot, AppError> {
        let started_at = Instant::now();
        let catalog = &self.catalog;
        let groups = with_retry(&self.retry, deadline, "load_hierarchy", || {
            catalog.load_hierarchy()
        })
        .await?;
        histogram!(METRIC_LOAD_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        let digest = digest_groups(&groups).map_err(|err| AppError::internal(err.to_string()))?;
        Ok(HierarchySnapshot {
            groups: Arc::new(groups),
            digest,
        })
    }

    async fn populate(&self, started_under: u64, snapshot: &HierarchySnapshot) {
        let generation = self.generation.lock().await;
        if *generation != started_under {
            counter!(METRIC_POPULATE_SKIPPED).increment(1);
            debug!(
                target = SOURCE,
                started_under,
                current = *generation,
                "hierarchy changed during load, not caching"
            );
            return;
        }

        let entry = CachedHierarchy {
            groups: Arc::clone(&snapshot.groups),
            digest: snapshot.digest.clone(),
        };
        if let Err(err) = self
            .backend
            .put(HIERARCHY_KEY, entry, self.config.ttl())
            .await
        {
            warn!(target = SOURCE, error = %err, "failed to cache hierarchy");
        }
    }
}
