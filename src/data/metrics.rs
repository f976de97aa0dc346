//! 性能指标
//!
//! 记录请求总数、缓存命中、远端调用耗时等，供连接池调优和外部观测使用。
//! 平均响应时间只统计真实的远端调用，缓存命中和去重等待不参与。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default, Clone)]
struct MetricsState {
    total_requests: u64,
    cache_hits: u64,
    deduplicated: u64,
    remote_calls: u64,
    remote_failures: u64,
    avg_response_ms: f64,
    memory_usage: f64,
}

/// 进程内性能指标
#[derive(Debug, Default)]
pub struct PerformanceMetrics {
    state: Mutex<MetricsState>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 缓存命中：计入请求数和命中数
    pub fn record_cache_hit(&self) {
        let mut state = self.lock();
        state.total_requests += 1;
        state.cache_hits += 1;
    }

    /// 加入了已在途的相同请求
    pub fn record_deduplicated(&self) {
        let mut state = self.lock();
        state.total_requests += 1;
        state.deduplicated += 1;
    }

    /// 发起了新的远端请求
    pub fn record_dispatched(&self) {
        self.lock().total_requests += 1;
    }

    /// 远端调用结束（无论成败），更新平均响应时间
    pub fn record_remote(&self, elapsed: Duration, success: bool) {
        let mut state = self.lock();
        state.remote_calls += 1;
        if !success {
            state.remote_failures += 1;
        }
        let sample = elapsed.as_secs_f64() * 1000.0;
        let n = state.remote_calls as f64;
        state.avg_response_ms += (sample - state.avg_response_ms) / n;
    }

    pub fn set_memory_usage(&self, ratio: f64) {
        self.lock().memory_usage = ratio;
    }

    pub fn avg_response_ms(&self) -> f64 {
        self.lock().avg_response_ms
    }

    /// 缓存命中率（命中数 / 请求总数）
    pub fn cache_hit_rate(&self) -> f64 {
        let state = self.lock();
        hit_rate(&state)
    }

    pub fn reset(&self) {
        *self.lock() = MetricsState::default();
    }

    /// 生成快照，连接池和缓存相关字段由调用方补充
    pub fn snapshot(
        &self,
        cache_size: usize,
        active_connections: usize,
        queued_requests: usize,
        max_connections: usize,
    ) -> MetricsSnapshot {
        let state = self.lock();
        MetricsSnapshot {
            avg_response_time_ms: state.avg_response_ms,
            total_requests: state.total_requests,
            cache_hits: state.cache_hits,
            deduplicated_requests: state.deduplicated,
            remote_calls: state.remote_calls,
            remote_failures: state.remote_failures,
            cache_hit_rate: hit_rate(&state),
            memory_usage: state.memory_usage,
            cache_size,
            active_connections,
            queued_requests,
            max_connections,
            captured_at: Utc::now(),
        }
    }
}

fn hit_rate(state: &MetricsState) -> f64 {
    if state.total_requests == 0 {
        0.0
    } else {
        state.cache_hits as f64 / state.total_requests as f64
    }
}

/// 指标快照
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub avg_response_time_ms: f64,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub deduplicated_requests: u64,
    pub remote_calls: u64,
    pub remote_failures: u64,
    pub cache_hit_rate: f64,
    pub memory_usage: f64,
    pub cache_size: usize,
    pub active_connections: usize,
    pub queued_requests: usize,
    pub max_connections: usize,
    pub captured_at: DateTime<Utc>,
}
