use super::{Category, CategoryId};
use crate::cache::{CacheConfig, CacheStats, StampedeSafeCache};
use crate::core::{ContentionError, Result};
use crate::storage::CategoryRepository;
use std::sync::Arc;
use tracing::debug;

/// Cache key holding the full ordered category list.
pub const ALL_CATEGORIES_KEY: &str = "all";

/// Category listing backed by the stampede-safe cache.
///
/// Reads go through the cache; every write invalidates it before
/// returning, so a caller that saved a category sees it on its next read.
pub struct CategoryService<R> {
    repository: Arc<R>,
    cache: StampedeSafeCache<&'static str, Arc<Vec<Category>>, ContentionError>,
}

impl<R: CategoryRepository> CategoryService<R> {
    pub fn new(repository: Arc<R>, cache: CacheConfig) -> Result<Self> {
        Ok(Self {
            repository,
            cache: StampedeSafeCache::new(cache)?,
        })
    }

    pub async fn find_all_categories(&self) -> Result<Arc<Vec<Category>>> {
        let repository = Arc::clone(&self.repository);
        let categories = self
            .cache
            .get_or_compute_default(ALL_CATEGORIES_KEY, || async move {
                let categories = repository.find_all_ordered().await?;
                debug!(count = categories.len(), "loaded categories from repository");
                Ok::<_, ContentionError>(Arc::new(categories))
            })
            .await?;
        Ok(categories)
    }

    pub async fn save_category(&self, category: Category) -> Result<Category> {
        let saved = self.repository.save(category).await?;
        self.evict_categories_cache();
        Ok(saved)
    }

    pub async fn delete_category(&self, id: CategoryId) -> Result<bool> {
        let removed = self.repository.delete(id).await?;
        self.evict_categories_cache();
        Ok(removed)
    }

    pub fn evict_categories_cache(&self) {
        self.cache.invalidate(&ALL_CATEGORIES_KEY);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
