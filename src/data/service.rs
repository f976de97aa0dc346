//! 数据访问服务
//!
//! 调用方通过 [`DataService::fetch_data`] 代替直接调用远端接口。单次请求的流转：
//!
//! ```text
//! 缓存检查 ──命中──> 返回缓存（from_cache = true）
//!    │
//!    ├──同键在途──> 等待共享结果
//!    │
//!    └──> 排队（连接池） -> 执行 -> 成功：写缓存 / 失败：返回错误
//! ```
//!
//! 远端调用在独立的 tokio 任务中执行：即使所有调用方都不再等待，
//! 请求也会跑完并写入缓存。本层不做重试，重试策略由上层决定。
//!
//! # 使用示例
//!
//! ```rust
//! use std::sync::Arc;
//! use stationops_data::data::{DataService, HttpPageFetcher};
//! use stationops_data::models::{FetchOptions, PageQuery};
//!
//! let fetcher = Arc::new(HttpPageFetcher::new("https://backend.example.com/api/tables")?);
//! let service = DataService::builder(fetcher).start()?;
//!
//! let page = service
//!     .fetch_data("employees", &PageQuery::new(1, 10), &FetchOptions::default())
//!     .await?;
//! println!("{} 条记录，来自缓存: {}", page.data.list.len(), page.from_cache);
//!
//! service.destroy();
//! ```

use super::cache::{derive_key, CacheKey, QueryCache};
use super::config::DataServiceConfig;
use super::error::{ConfigError, FetchError, Result};
use super::fetcher::PageFetcher;
use super::inflight::{InFlightRegistry, SharedFetch};
use super::maintenance::{self, MaintenanceReport};
use super::memory::{MemoryProbe, NoopMemoryProbe};
use super::metrics::{MetricsSnapshot, PerformanceMetrics};
use super::pool::ConnectionPool;
use super::shaping::shape_query;
use crate::models::{FetchOptions, FetchResult, PageData, PageQuery};
use futures_util::FutureExt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 服务内部状态，由前台请求和后台维护任务共享
pub(crate) struct ServiceInner {
    pub(crate) config: DataServiceConfig,
    pub(crate) fetcher: Arc<dyn PageFetcher>,
    pub(crate) memory_probe: Arc<dyn MemoryProbe>,
    pub(crate) cache: QueryCache,
    pub(crate) inflight: InFlightRegistry,
    pub(crate) pool: ConnectionPool,
    pub(crate) metrics: PerformanceMetrics,
}

impl ServiceInner {
    /// 执行远端调用并记录耗时
    async fn fetch_remote(&self, table: &str, query: &PageQuery) -> Result<Arc<PageData>> {
        let started = Instant::now();
        let outcome = self.fetcher.fetch_page(table, query).await;
        self.metrics.record_remote(started.elapsed(), outcome.is_ok());

        match outcome {
            Ok(data) => Ok(Arc::new(data)),
            Err(e) => {
                let message = format!("{e:#}");
                tracing::warn!(table = %table, error = %message, "远端查询失败");
                Err(FetchError::Remote(message))
            }
        }
    }

    /// 请求结束：仍持有登记时写缓存并移除登记
    ///
    /// 写缓存和移除登记在同一把锁内完成，并发的同键调用方要么看到在途请求，
    /// 要么看到缓存。登记已被清空（内存压力）时结果不写入缓存。
    fn settle(&self, key: &CacheKey, id: u64, result: &Result<Arc<PageData>>, write_cache: bool) {
        let mut inflight = self.inflight.lock();
        if !inflight.complete(key, id) {
            tracing::debug!(key = %key, "在途登记已被清空，结果不写入缓存");
            return;
        }
        if let (true, Ok(data)) = (write_cache, result) {
            self.cache.write(key.clone(), Arc::clone(data));
        }
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            self.cache.len(),
            self.pool.active(),
            self.pool.queued(),
            self.pool.max_connections(),
        )
    }
}

/// 后台任务 panic 时兜底移除在途登记，避免后续调用方永远等到同一个失败结果
struct SettleGuard {
    inner: Arc<ServiceInner>,
    key: CacheKey,
    id: u64,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.inner.inflight.lock().complete(&self.key, self.id);
    }
}

/// 数据访问服务
///
/// 显式构造、按需注入配置和内存探测，多个实例之间互不影响。
pub struct DataService {
    inner: Arc<ServiceInner>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DataService {
    /// 使用默认配置创建（不启动后台任务）
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self::from_parts(
            fetcher,
            DataServiceConfig::default(),
            Arc::new(NoopMemoryProbe),
        )
    }

    pub fn builder(fetcher: Arc<dyn PageFetcher>) -> DataServiceBuilder {
        DataServiceBuilder {
            fetcher,
            config: DataServiceConfig::default(),
            memory_probe: Arc::new(NoopMemoryProbe),
        }
    }

    fn from_parts(
        fetcher: Arc<dyn PageFetcher>,
        config: DataServiceConfig,
        memory_probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let inner = ServiceInner {
            cache: QueryCache::new(config.cache_capacity, config.cache_ttl()),
            inflight: InFlightRegistry::new(),
            pool: ConnectionPool::new(
                config.initial_max_connections,
                config.min_connections,
                config.max_connections,
            ),
            metrics: PerformanceMetrics::new(),
            config,
            fetcher,
            memory_probe,
        };

        Self {
            inner: Arc::new(inner),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// 查询一页数据
    ///
    /// # 返回
    /// - `Ok(FetchResult)`: `from_cache` 标记结果是否来自缓存
    /// - `Err(FetchError::Remote)`: 远端错误，原样透传，不会写入缓存
    pub async fn fetch_data(
        &self,
        table: &str,
        params: &PageQuery,
        options: &FetchOptions,
    ) -> Result<FetchResult> {
        let key = derive_key(
            table,
            params,
            options.fields.as_deref(),
            options.viewport.as_ref(),
        )?;

        if let Some(hit) = self.try_cache(&key, options) {
            return Ok(hit);
        }

        let query = shape_query(params, options, &self.inner.config.default_order_field);
        let fetch = {
            let mut inflight = self.inner.inflight.lock();
            match inflight.get(&key) {
                Some(existing) => {
                    self.inner.metrics.record_deduplicated();
                    tracing::debug!(key = %key, "复用在途请求");
                    existing
                }
                None => {
                    // 持锁复查：同键请求可能刚刚结束并写入缓存
                    if let Some(hit) = self.try_cache(&key, options) {
                        return Ok(hit);
                    }

                    let id = inflight.next_id();
                    let fetch = self.dispatch(key.clone(), id, table.to_string(), query, options.use_cache);
                    inflight.register(key.clone(), id, fetch.clone());
                    self.inner.metrics.record_dispatched();
                    tracing::debug!(key = %key, priority = ?options.priority, "发起远端请求");
                    fetch
                }
            }
        };

        let data = fetch.await?;
        Ok(FetchResult {
            data,
            from_cache: false,
        })
    }

    fn try_cache(&self, key: &CacheKey, options: &FetchOptions) -> Option<FetchResult> {
        if !options.use_cache {
            return None;
        }
        let data = self.inner.cache.read_valid(key)?;
        self.inner.metrics.record_cache_hit();
        tracing::trace!(key = %key, "缓存命中");
        Some(FetchResult {
            data,
            from_cache: true,
        })
    }

    /// 在独立任务中排队执行远端调用，返回可共享的结果
    fn dispatch(
        &self,
        key: CacheKey,
        id: u64,
        table: String,
        query: PageQuery,
        write_cache: bool,
    ) -> SharedFetch {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let guard = SettleGuard {
                inner: Arc::clone(&inner),
                key,
                id,
            };
            let result = inner
                .pool
                .acquire_and_run(inner.fetch_remote(&table, &query))
                .await
                .and_then(|result| result);
            inner.settle(&guard.key, guard.id, &result, write_cache);
            result
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(FetchError::TaskAborted(e.to_string())))
        }
        .boxed()
        .shared()
    }

    /// 执行一次后台维护（清理缓存、调优连接池、检查内存）
    pub fn run_maintenance(&self) -> MaintenanceReport {
        maintenance::run_tick(&self.inner)
    }

    /// 汇报性能指标，超过阈值时输出告警
    pub fn report_metrics(&self) -> MetricsSnapshot {
        maintenance::report_metrics(&self.inner)
    }

    /// 当前性能指标
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.inner.snapshot()
    }

    /// 启动后台维护和指标汇报任务
    ///
    /// 必须在 tokio 运行时内调用；重复调用不会启动第二组任务。
    pub fn start_background_tasks(&self) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("后台任务需要 tokio 运行时: {e}"))?;

        if self.shutdown.is_cancelled() {
            anyhow::bail!("服务已销毁，不能再启动后台任务");
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            tracing::warn!("后台任务已在运行，忽略重复启动");
            return Ok(());
        }

        tasks.extend(maintenance::spawn_background_tasks(
            &runtime,
            Arc::clone(&self.inner),
            self.shutdown.clone(),
        ));
        tracing::info!(
            maintenance_interval_ms = self.inner.config.maintenance_interval_ms,
            metrics_interval_ms = self.inner.config.metrics_interval_ms,
            "数据访问服务后台任务已启动"
        );
        Ok(())
    }

    /// 使某个表的全部缓存失效（该表发生写入后调用）
    pub fn invalidate_table(&self, table: &str) -> usize {
        self.inner.cache.invalidate_table(table)
    }

    /// 停止后台任务并清空缓存、在途登记和排队请求
    ///
    /// 已在执行的远端调用不会被取消。销毁后的 `fetch_data` 返回 `PoolClosed`。
    pub fn destroy(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in &tasks {
            task.abort();
        }

        let cleared = self.inner.cache.clear();
        let inflight = self.inner.inflight.clear();
        self.inner.pool.close();
        tracing::info!(
            cleared_cache = cleared,
            cleared_inflight = inflight,
            stopped_tasks = tasks.len(),
            "数据访问服务已销毁"
        );
    }

    pub fn is_destroyed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn config(&self) -> &DataServiceConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// 当前在途请求数
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.len()
    }
}

impl Drop for DataService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// [`DataService`] 构建器
pub struct DataServiceBuilder {
    fetcher: Arc<dyn PageFetcher>,
    config: DataServiceConfig,
    memory_probe: Arc<dyn MemoryProbe>,
}

impl DataServiceBuilder {
    pub fn config(mut self, config: DataServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = probe;
        self
    }

    /// 校验配置并创建服务（不启动后台任务）
    pub fn build(self) -> std::result::Result<DataService, ConfigError> {
        self.config.validate()?;
        Ok(DataService::from_parts(
            self.fetcher,
            self.config,
            self.memory_probe,
        ))
    }

    /// 创建服务并启动后台任务
    pub fn start(self) -> anyhow::Result<DataService> {
        let service = self.build()?;
        service.start_background_tasks()?;
        Ok(service)
    }
}
