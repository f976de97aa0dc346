//! 后台维护
//!
//! 维护周期（默认 30 秒）内依次执行三项互不依赖的工作：
//! 1. 清理过期条目和冷条目
//! 2. 根据平均响应时间调整连接池上限（每次 ±1，限制在 `[min, max]`）
//! 3. 检查堆使用率，超过阈值时清空缓存和在途登记
//!
//! 另有一个较低频率的任务（默认 60 秒）汇报性能指标并在超过阈值时告警。

use super::config::DataServiceConfig;
use super::metrics::MetricsSnapshot;
use super::pool::ConnectionPool;
use super::service::ServiceInner;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 单次维护的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaintenanceReport {
    /// 清理的缓存条目数
    pub evicted: usize,
    /// 调整后的连接池上限
    pub max_connections: usize,
    /// 本次采样的堆使用率
    pub memory_usage: f64,
    /// 是否因内存压力清空了缓存
    pub flushed: bool,
}

/// 执行一次维护
pub(crate) fn run_tick(inner: &ServiceInner) -> MaintenanceReport {
    let config = &inner.config;

    let evicted = inner
        .cache
        .evict_stale(config.cache_idle_eviction(), config.cold_entry_min_access);
    if evicted > 0 {
        tracing::info!(evicted, remaining = inner.cache.len(), "清理过期缓存");
    }

    let max_connections = retune_pool(&inner.pool, inner.metrics.avg_response_ms(), config);

    let memory_usage = inner.memory_probe.heap_usage_ratio();
    inner.metrics.set_memory_usage(memory_usage);
    let flushed = memory_usage > config.memory_flush_threshold;
    if flushed {
        let cleared = inner.cache.clear();
        let inflight = inner.inflight.clear();
        inner.memory_probe.request_gc();
        tracing::warn!(
            memory_usage,
            threshold = config.memory_flush_threshold,
            cleared_cache = cleared,
            cleared_inflight = inflight,
            "内存使用率过高，已清空缓存"
        );
    }

    MaintenanceReport {
        evicted,
        max_connections,
        memory_usage,
        flushed,
    }
}

/// 根据平均响应时间调整连接池上限，返回调整后的值
///
/// 慢于 `slow_response_ms` 减 1，快于 `fast_response_ms` 加 1，其余不变。
pub fn retune_pool(pool: &ConnectionPool, avg_response_ms: f64, config: &DataServiceConfig) -> usize {
    let current = pool.max_connections();
    let target = if avg_response_ms > config.slow_response_ms as f64 {
        current.saturating_sub(1)
    } else if avg_response_ms < config.fast_response_ms as f64 {
        current + 1
    } else {
        current
    };

    if target == current {
        return current;
    }

    let applied = pool.set_max_connections(target);
    if applied != current {
        tracing::debug!(
            from = current,
            to = applied,
            avg_response_ms,
            "调整连接池上限"
        );
    }
    applied
}

/// 汇报性能指标
pub(crate) fn report_metrics(inner: &ServiceInner) -> MetricsSnapshot {
    let snapshot = inner.snapshot();
    let config = &inner.config;

    tracing::info!(
        cache_size = snapshot.cache_size,
        active_connections = snapshot.active_connections,
        queued_requests = snapshot.queued_requests,
        max_connections = snapshot.max_connections,
        avg_response_time_ms = snapshot.avg_response_time_ms,
        cache_hit_rate = snapshot.cache_hit_rate,
        memory_usage = snapshot.memory_usage,
        "数据访问性能指标"
    );

    if snapshot.avg_response_time_ms > config.response_warn_ms as f64 {
        tracing::warn!(
            avg_response_time_ms = snapshot.avg_response_time_ms,
            threshold_ms = config.response_warn_ms,
            "平均响应时间过长"
        );
    }
    if snapshot.memory_usage > config.memory_warn_threshold {
        tracing::warn!(
            memory_usage = snapshot.memory_usage,
            threshold = config.memory_warn_threshold,
            "内存使用率偏高"
        );
    }

    snapshot
}

/// 启动维护任务和指标汇报任务，`token` 取消后两者退出
pub(crate) fn spawn_background_tasks(
    runtime: &Handle,
    inner: Arc<ServiceInner>,
    token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let maintenance = {
        let inner = Arc::clone(&inner);
        let token = token.clone();
        let period = inner.config.maintenance_interval();
        runtime.spawn(run_periodic(period, token, "维护", move || {
            run_tick(&inner);
        }))
    };

    let metrics = {
        let period = inner.config.metrics_interval();
        runtime.spawn(run_periodic(period, token, "指标汇报", move || {
            report_metrics(&inner);
        }))
    };

    vec![maintenance, metrics]
}

/// 按固定周期执行 `tick`，首次执行在一个周期之后
async fn run_periodic<F>(period: Duration, token: CancellationToken, name: &'static str, mut tick: F)
where
    F: FnMut() + Send + 'static,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => tick(),
        }
    }
    tracing::debug!(task = name, "后台任务已停止");
}
