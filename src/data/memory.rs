//! 宿主内存探测
//!
//! 后台维护通过 [`MemoryProbe`] 获取堆使用率，超过阈值时清空缓存。
//! 没有内存统计能力的平台使用 [`NoopMemoryProbe`]，始终报告 0。

/// 堆内存探测能力
pub trait MemoryProbe: Send + Sync {
    /// 当前堆使用率（已用 / 总量），取值 `[0, 1]`
    fn heap_usage_ratio(&self) -> f64;

    /// 请求宿主回收内存（如果支持）
    fn request_gc(&self) {}
}

/// 不做任何探测的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMemoryProbe;

impl MemoryProbe for NoopMemoryProbe {
    fn heap_usage_ratio(&self) -> f64 {
        0.0
    }
}
