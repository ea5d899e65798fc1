/// Stampede tests for the read-through cache and the category listing
///
/// Run with: cargo test --test cache_single_flight_tests

use contendb::{
    CacheConfig, Category, CategoryId, CategoryRepository, CategoryService, ContentionError,
    ContentionHarness, InMemoryStore, StampedeSafeCache, StoreConfig,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;

async fn seeded_categories(latency: Duration) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::with_config(
        StoreConfig::default().round_trip_latency(latency),
    ));
    for (i, name) in ["Coffee", "Tea", "Bakery"].into_iter().enumerate() {
        store
            .save(Category::new(CategoryId(i as u64 + 1), name, i as i32))
            .await
            .unwrap();
    }
    store
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_hundred_callers_one_computation() {
    let cache = Arc::new(StampedeSafeCache::<&str, u64, ContentionError>::new(CacheConfig::default()).unwrap());

    let report = ContentionHarness::run_single_flight(&cache, "all", 100, || async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(7)
    })
    .await;

    assert_eq!(report.callers, 100);
    assert_eq!(report.computations, 1, "{report}");
    assert_eq!(report.succeeded, 100);
    assert_eq!(cache.get_if_fresh(&"all"), Some(7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_repeated_stampedes_after_invalidation() {
    let cache = Arc::new(StampedeSafeCache::<&str, u64, ContentionError>::new(CacheConfig::default()).unwrap());

    for round in 0..5u64 {
        let report = ContentionHarness::run_single_flight(&cache, "all", 50, move || async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(round)
        })
        .await;
        assert_eq!(report.computations, 1, "round {round}");
        assert_eq!(cache.get_if_fresh(&"all"), Some(round));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_failed_computation_shared_then_retried() {
    let cache = Arc::new(StampedeSafeCache::<&str, u64, ContentionError>::new(CacheConfig::default()).unwrap());

    let report = ContentionHarness::run_single_flight(&cache, "all", 20, || async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Err(ContentionError::Storage("catalog unavailable".into()))
    })
    .await;
    assert_eq!(report.failed, 20);
    assert!(report.computations >= 1);
    assert!(cache.is_empty());

    let value = cache
        .get_or_compute_default("all", || async { Ok::<_, ContentionError>(1) })
        .await
        .unwrap();
    assert_eq!(value, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_category_stampede_hits_repository_once() {
    let store = seeded_categories(Duration::from_millis(20)).await;
    let service = Arc::new(CategoryService::new(Arc::clone(&store), CacheConfig::default()).unwrap());

    let gate = Arc::new(Barrier::new(100));
    let mut handles = vec![];
    for _ in 0..100 {
        let service = Arc::clone(&service);
        let gate = Arc::clone(&gate);
        handles.push(tokio::spawn(async move {
            gate.wait().await;
            service.find_all_categories().await.unwrap().len()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 3);
    }

    let stats = service.cache_stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_write_then_read_sees_write() {
    let store = seeded_categories(Duration::from_millis(1)).await;
    let service = Arc::new(CategoryService::new(store, CacheConfig::default()).unwrap());
    assert_eq!(service.find_all_categories().await.unwrap().len(), 3);

    // Keep readers busy while writing.
    let stop = Arc::new(AtomicUsize::new(0));
    let mut readers = vec![];
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let stop = Arc::clone(&stop);
        readers.push(tokio::spawn(async move {
            while stop.load(Ordering::SeqCst) == 0 {
                service.find_all_categories().await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    for id in 10..20u64 {
        service
            .save_category(Category::new(CategoryId(id), format!("Extra {id}"), 10))
            .await
            .unwrap();
        let listed = service.find_all_categories().await.unwrap();
        assert!(listed.iter().any(|c| c.id == CategoryId(id)), "missing {id}");
    }

    stop.store(1, Ordering::SeqCst);
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(service.find_all_categories().await.unwrap().len(), 13);
}

#[tokio::test]
async fn test_explicit_eviction() {
    let store = seeded_categories(Duration::ZERO).await;
    let service = CategoryService::new(Arc::clone(&store), CacheConfig::default()).unwrap();
    service.find_all_categories().await.unwrap();

    // Written behind the service's back: invisible until evicted.
    store.save(Category::new(CategoryId(9), "Juice", 5)).await.unwrap();
    assert_eq!(service.find_all_categories().await.unwrap().len(), 3);

    service.evict_categories_cache();
    assert_eq!(service.find_all_categories().await.unwrap().len(), 4);
}
