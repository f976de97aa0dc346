//! DataService 端到端测试：缓存命中、去重、连接池、后台维护和内存压力

use super::config::DataServiceConfig;
use super::error::FetchError;
use super::fetcher::PageFetcher;
use super::memory::MemoryProbe;
use super::service::DataService;
use crate::models::{FetchOptions, PageData, PageQuery, Priority, Viewport};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::json;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// 可控的远端接口替身
#[derive(Default)]
struct FakeFetcher {
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, PageQuery)>>,
    delay: Duration,
    error: Option<String>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeFetcher {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            delay: Duration::from_millis(50),
            ..Self::default()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn pages_seen(&self) -> Vec<u32> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, query)| query.page_no)
            .collect()
    }

    fn last_query(&self) -> PageQuery {
        self.seen.lock().unwrap().last().unwrap().1.clone()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch_page(&self, table: &str, query: &PageQuery) -> anyhow::Result<PageData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((table.to_string(), query.clone()));

        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = &self.error {
            anyhow::bail!("{error}");
        }

        Ok(PageData {
            list: vec![json!({"table": table, "page": query.page_no})],
            virtual_count: 100,
        })
    }
}

/// 可设置堆使用率的内存探测替身
#[derive(Default)]
struct FakeProbe {
    ratio_bits: AtomicU64,
    gc_requests: AtomicUsize,
}

impl FakeProbe {
    fn set(&self, ratio: f64) {
        self.ratio_bits.store(ratio.to_bits(), Ordering::SeqCst);
    }
}

impl MemoryProbe for FakeProbe {
    fn heap_usage_ratio(&self) -> f64 {
        f64::from_bits(self.ratio_bits.load(Ordering::SeqCst))
    }

    fn request_gc(&self) {
        self.gc_requests.fetch_add(1, Ordering::SeqCst);
    }
}

fn service(fetcher: &Arc<FakeFetcher>) -> DataService {
    DataService::new(Arc::clone(fetcher) as Arc<dyn PageFetcher>)
}

fn single_slot_config() -> DataServiceConfig {
    DataServiceConfig {
        initial_max_connections: 1,
        min_connections: 1,
        max_connections: 1,
        ..DataServiceConfig::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_fetch_within_ttl_is_cached() {
    let fetcher = Arc::new(FakeFetcher::with_delay(Duration::from_millis(20)));
    let service = service(&fetcher);
    let params = PageQuery::new(1, 10);

    let first = service
        .fetch_data("employees", &params, &FetchOptions::default())
        .await
        .unwrap();
    assert!(!first.from_cache);

    let second = service
        .fetch_data("employees", &params, &FetchOptions::default())
        .await
        .unwrap();
    assert!(second.from_cache);
    assert!(Arc::ptr_eq(&first.data, &second.data));
    assert_eq!(fetcher.calls(), 1);

    let metrics = service.get_metrics();
    assert_eq!(metrics.total_requests, 2);
    assert!((metrics.cache_hit_rate - 0.5).abs() < 1e-9);
    assert!((metrics.avg_response_time_ms - 20.0).abs() < 1e-6);
    assert_eq!(metrics.cache_size, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reordered_params_hit_cache() {
    let fetcher = Arc::new(FakeFetcher::default());
    let service = service(&fetcher);

    let a: PageQuery = serde_json::from_str(r#"{"PageNo":1,"PageSize":10,"IsAsc":true}"#).unwrap();
    let b: PageQuery = serde_json::from_str(r#"{"IsAsc":true,"PageSize":10,"PageNo":1}"#).unwrap();

    service
        .fetch_data("employees", &a, &FetchOptions::default())
        .await
        .unwrap();
    let hit = service
        .fetch_data("employees", &b, &FetchOptions::default())
        .await
        .unwrap();
    assert!(hit.from_cache);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_refetched() {
    let fetcher = Arc::new(FakeFetcher::default());
    let service = service(&fetcher);
    let params = PageQuery::new(1, 10);

    service
        .fetch_data("employees", &params, &FetchOptions::default())
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(301)).await;

    let again = service
        .fetch_data("employees", &params, &FetchOptions::default())
        .await
        .unwrap();
    assert!(!again.from_cache);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_remote_call() {
    let fetcher = Arc::new(FakeFetcher::with_delay(Duration::from_millis(100)));
    let service = service(&fetcher);
    let params = PageQuery::new(1, 10);
    let options = FetchOptions::default();

    let results = join_all((0..5).map(|_| service.fetch_data("employees", &params, &options))).await;

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(results.len(), 5);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        let result = result.as_ref().unwrap();
        assert!(!result.from_cache);
        assert!(Arc::ptr_eq(&first.data, &result.data));
    }
    assert_eq!(service.in_flight(), 0);

    let metrics = service.get_metrics();
    assert_eq!(metrics.total_requests, 5);
    assert_eq!(metrics.deduplicated_requests, 4);
    assert_eq!(metrics.remote_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_failure() {
    let fetcher = Arc::new(FakeFetcher::failing("upstream unavailable"));
    let service = service(&fetcher);
    let params = PageQuery::new(1, 10);
    let options = FetchOptions::default();

    let results = join_all((0..3).map(|_| service.fetch_data("sales", &params, &options))).await;

    assert_eq!(fetcher.calls(), 1);
    for result in results {
        assert_eq!(
            result.unwrap_err(),
            FetchError::Remote("upstream unavailable".to_string())
        );
    }
    assert_eq!(service.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_errors_are_not_cached() {
    let fetcher = Arc::new(FakeFetcher::failing("permission denied"));
    let service = service(&fetcher);
    let params = PageQuery::new(1, 10);

    for _ in 0..2 {
        let err = service
            .fetch_data("licenses", &params, &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Remote(_)));
    }

    assert_eq!(fetcher.calls(), 2);
    assert!(service.cache().is_empty());
    assert_eq!(service.in_flight(), 0);
    assert_eq!(service.get_metrics().remote_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_uncached_fetch_bypasses_cache() {
    let fetcher = Arc::new(FakeFetcher::default());
    let service = service(&fetcher);
    let params = PageQuery::new(1, 10);

    for _ in 0..2 {
        let result = service
            .fetch_data("employees", &params, &FetchOptions::uncached())
            .await
            .unwrap();
        assert!(!result.from_cache);
    }
    assert_eq!(fetcher.calls(), 2);
    assert!(service.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_options_shape_remote_query() {
    let fetcher = Arc::new(FakeFetcher::default());
    let service = service(&fetcher);
    let options = FetchOptions::default()
        .with_viewport(Viewport::new(100, 150))
        .with_fields(["id", "name"])
        .with_priority(Priority::High);

    service
        .fetch_data("employees", &PageQuery::new(1, 50), &options)
        .await
        .unwrap();

    let query = fetcher.last_query();
    assert_eq!(query.page_no, 3);
    assert_eq!(query.page_size, 50);
    assert_eq!(query.fields, Some(vec!["id".to_string(), "name".to_string()]));
    assert_eq!(query.order_by_field.as_deref(), Some("id"));
    assert_eq!(query.is_asc, Some(false));
}

#[tokio::test]
async fn test_priority_does_not_reorder_queue() {
    // 优先级只影响默认排序；排队顺序严格按到达顺序
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = Arc::new(FakeFetcher::gated(Arc::clone(&gate)));
    let service = Arc::new(
        DataService::builder(Arc::clone(&fetcher) as Arc<dyn PageFetcher>)
            .config(single_slot_config())
            .build()
            .unwrap(),
    );

    let priorities = [Priority::Normal, Priority::Low, Priority::High, Priority::Normal];
    let mut handles = Vec::new();
    for (i, priority) in priorities.into_iter().enumerate() {
        let caller = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let page = i as u32 + 1;
            caller
                .fetch_data(
                    "employees",
                    &PageQuery::new(page, 10),
                    &FetchOptions::default().with_priority(priority),
                )
                .await
        }));

        if i == 0 {
            wait_until(|| fetcher.calls() == 1).await;
        } else {
            wait_until(|| service.pool().queued() == i).await;
        }
    }

    assert_eq!(service.pool().active(), 1);
    gate.add_permits(priorities.len());
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(fetcher.pages_seen(), vec![1, 2, 3, 4]);
    assert_eq!(service.pool().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_caller_still_populates_cache() {
    let fetcher = Arc::new(FakeFetcher::with_delay(Duration::from_millis(100)));
    let service = service(&fetcher);
    let params = PageQuery::new(1, 10);

    let timed_out = tokio::time::timeout(
        Duration::from_millis(10),
        service.fetch_data("employees", &params, &FetchOptions::default()),
    )
    .await;
    assert!(timed_out.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(service.cache().len(), 1);
    assert_eq!(service.in_flight(), 0);

    let hit = service
        .fetch_data("employees", &params, &FetchOptions::default())
        .await
        .unwrap();
    assert!(hit.from_cache);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_responses_shrink_pool_to_floor() {
    let fetcher = Arc::new(FakeFetcher::with_delay(Duration::from_millis(1500)));
    let service = service(&fetcher);

    service
        .fetch_data("sales", &PageQuery::new(1, 10), &FetchOptions::default())
        .await
        .unwrap();
    assert!((service.get_metrics().avg_response_time_ms - 1500.0).abs() < 1e-6);
    assert_eq!(service.pool().max_connections(), 10);

    let report = service.run_maintenance();
    assert_eq!(report.max_connections, 9);
    assert_eq!(service.pool().max_connections(), 9);

    for _ in 0..10 {
        service.run_maintenance();
    }
    assert_eq!(service.pool().max_connections(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_fast_responses_grow_pool_to_ceiling() {
    let fetcher = Arc::new(FakeFetcher::with_delay(Duration::from_millis(50)));
    let service = service(&fetcher);

    service
        .fetch_data("sales", &PageQuery::new(1, 10), &FetchOptions::default())
        .await
        .unwrap();

    for _ in 0..10 {
        service.run_maintenance();
    }
    assert_eq!(service.pool().max_connections(), 15);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_evicts_cold_entries() {
    let fetcher = Arc::new(FakeFetcher::default());
    let config = DataServiceConfig {
        cache_ttl_ms: 3_600_000,
        ..DataServiceConfig::default()
    };
    let service = DataService::builder(Arc::clone(&fetcher) as Arc<dyn PageFetcher>)
        .config(config)
        .build()
        .unwrap();

    let cold = PageQuery::new(1, 10);
    let warm = PageQuery::new(2, 10);
    let options = FetchOptions::default();
    service.fetch_data("employees", &cold, &options).await.unwrap();
    service.fetch_data("employees", &warm, &options).await.unwrap();
    assert!(service.fetch_data("employees", &warm, &options).await.unwrap().from_cache);

    tokio::time::advance(Duration::from_secs(601)).await;
    let report = service.run_maintenance();
    assert_eq!(report.evicted, 1);
    assert!(!report.flushed);

    assert!(service.fetch_data("employees", &warm, &options).await.unwrap().from_cache);
    assert!(!service.fetch_data("employees", &cold, &options).await.unwrap().from_cache);
}

#[tokio::test]
async fn test_memory_pressure_flushes_cache_and_registry() {
    let gate = Arc::new(Semaphore::new(1));
    let fetcher = Arc::new(FakeFetcher::gated(Arc::clone(&gate)));
    let probe = Arc::new(FakeProbe::default());
    let service = Arc::new(
        DataService::builder(Arc::clone(&fetcher) as Arc<dyn PageFetcher>)
            .memory_probe(Arc::clone(&probe) as Arc<dyn MemoryProbe>)
            .build()
            .unwrap(),
    );

    service
        .fetch_data("employees", &PageQuery::new(1, 10), &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(service.cache().len(), 1);

    let pending = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .fetch_data("employees", &PageQuery::new(2, 10), &FetchOptions::default())
                .await
        })
    };
    wait_until(|| fetcher.calls() == 2).await;
    assert_eq!(service.in_flight(), 1);

    probe.set(0.5);
    assert!(!service.run_maintenance().flushed);
    assert_eq!(service.cache().len(), 1);

    probe.set(0.85);
    let report = service.run_maintenance();
    assert!(report.flushed);
    assert!((report.memory_usage - 0.85).abs() < 1e-9);
    assert!(service.cache().is_empty());
    assert_eq!(service.in_flight(), 0);
    assert_eq!(probe.gc_requests.load(Ordering::SeqCst), 1);

    // 在途请求不会被取消，但结果不再写入缓存
    gate.add_permits(1);
    let result = pending.await.unwrap().unwrap();
    assert!(!result.from_cache);
    assert!(service.cache().is_empty());
    assert!((service.get_metrics().memory_usage - 0.85).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_table() {
    let fetcher = Arc::new(FakeFetcher::default());
    let service = service(&fetcher);
    let options = FetchOptions::default();

    service.fetch_data("employees", &PageQuery::new(1, 10), &options).await.unwrap();
    service.fetch_data("licenses", &PageQuery::new(1, 10), &options).await.unwrap();

    assert_eq!(service.invalidate_table("employees"), 1);
    let refreshed = service
        .fetch_data("employees", &PageQuery::new(1, 10), &options)
        .await
        .unwrap();
    assert!(!refreshed.from_cache);
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_background_tasks_tick_until_destroyed() {
    let fetcher = Arc::new(FakeFetcher::default());
    let service = DataService::builder(Arc::clone(&fetcher) as Arc<dyn PageFetcher>)
        .start()
        .unwrap();
    // 重复启动不会产生第二组任务
    service.start_background_tasks().unwrap();

    // 尚无远端调用，平均响应时间为 0，每次维护扩容 1
    tokio::time::sleep(Duration::from_millis(30_100)).await;
    assert_eq!(service.pool().max_connections(), 11);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(service.pool().max_connections(), 12);

    service.destroy();
    assert!(service.is_destroyed());
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(service.pool().max_connections(), 12);

    let err = service
        .fetch_data("employees", &PageQuery::new(1, 10), &FetchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::PoolClosed);
    assert!(service.start_background_tasks().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_destroy_clears_state() {
    let fetcher = Arc::new(FakeFetcher::default());
    let service = service(&fetcher);
    service
        .fetch_data("employees", &PageQuery::new(1, 10), &FetchOptions::default())
        .await
        .unwrap();

    service.destroy();
    assert!(service.cache().is_empty());
    assert_eq!(service.in_flight(), 0);
    assert!(service.pool().is_closed());
}

#[tokio::test]
async fn test_report_metrics_snapshot() {
    let fetcher = Arc::new(FakeFetcher::default());
    let service = service(&fetcher);
    service
        .fetch_data("employees", &PageQuery::new(1, 10), &FetchOptions::default())
        .await
        .unwrap();

    let snapshot = service.report_metrics();
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.cache_size, 1);
    assert_eq!(snapshot.max_connections, 10);
    assert_eq!(snapshot.active_connections, 0);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let fetcher = Arc::new(FakeFetcher::default());
    let result = DataService::builder(fetcher as Arc<dyn PageFetcher>)
        .config(DataServiceConfig {
            min_connections: 0,
            ..DataServiceConfig::default()
        })
        .build();
    assert!(result.is_err());
}

#[test]
fn test_start_outside_runtime_fails() {
    let fetcher = Arc::new(FakeFetcher::default());
    let service = DataService::new(fetcher as Arc<dyn PageFetcher>);
    assert!(service.start_background_tasks().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_viewport_at_upper_bound_fetches_last_page() {
    let fetcher = Arc::new(FakeFetcher::default());
    let service = service(&fetcher);
    let options = FetchOptions::default().with_viewport(Viewport::new(u32::MAX, u32::MAX));

    let result = service
        .fetch_data("employees", &PageQuery::new(1, 1), &options)
        .await
        .unwrap();
    assert!(!result.from_cache);
    assert_eq!(fetcher.last_query().page_no, u32::MAX);

    // 在途登记仍可正常使用
    let again = service
        .fetch_data("employees", &PageQuery::new(1, 1), &options)
        .await
        .unwrap();
    assert!(again.from_cache);
    assert_eq!(service.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_priority_is_not_part_of_cache_key() {
    // 优先级不参与缓存键：高优先级请求会复用普通请求的结果（不带默认倒序）
    let fetcher = Arc::new(FakeFetcher::default());
    let service = service(&fetcher);
    let params = PageQuery::new(1, 10);

    service
        .fetch_data("employees", &params, &FetchOptions::default())
        .await
        .unwrap();
    let high = service
        .fetch_data(
            "employees",
            &params,
            &FetchOptions::default().with_priority(Priority::High),
        )
        .await
        .unwrap();

    assert!(high.from_cache);
    assert_eq!(fetcher.calls(), 1);
    assert!(fetcher.last_query().order_by_field.is_none());
}
