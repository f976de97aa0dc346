//! 数据访问层配置
//!
//! 所有时间字段以毫秒为单位，便于直接写入 TOML/JSON 配置文件。
//! 缺省字段使用文档中的默认值，加载后统一调用 [`DataServiceConfig::validate`]。

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 数据访问服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataServiceConfig {
    /// 缓存条目生存时间
    pub cache_ttl_ms: u64,
    /// 缓存最大条目数，超过后淘汰最久未使用的条目
    pub cache_capacity: usize,
    /// 冷条目空闲阈值：访问次数不足且超过该时长未访问的条目会被清理
    pub cache_idle_eviction_ms: u64,
    /// 访问次数低于该值的条目视为冷条目
    pub cold_entry_min_access: u64,
    /// 后台维护（缓存清理、连接池调优、内存检查）周期
    pub maintenance_interval_ms: u64,
    /// 性能指标汇报周期
    pub metrics_interval_ms: u64,
    /// 连接池初始并发上限
    pub initial_max_connections: usize,
    /// 连接池并发上限的下界
    pub min_connections: usize,
    /// 连接池并发上限的上界
    pub max_connections: usize,
    /// 平均响应时间高于该值时收缩连接池
    pub slow_response_ms: u64,
    /// 平均响应时间低于该值时扩容连接池
    pub fast_response_ms: u64,
    /// 堆使用率高于该值时清空缓存
    pub memory_flush_threshold: f64,
    /// 指标汇报时，堆使用率高于该值输出告警
    pub memory_warn_threshold: f64,
    /// 指标汇报时，平均响应时间高于该值输出告警
    pub response_warn_ms: u64,
    /// 高优先级请求未指定排序时使用的标识字段（倒序）
    pub default_order_field: String,
}

impl Default for DataServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 300_000,
            cache_capacity: 1000,
            cache_idle_eviction_ms: 600_000,
            cold_entry_min_access: 2,
            maintenance_interval_ms: 30_000,
            metrics_interval_ms: 60_000,
            initial_max_connections: 10,
            min_connections: 5,
            max_connections: 15,
            slow_response_ms: 1000,
            fast_response_ms: 300,
            memory_flush_threshold: 0.8,
            memory_warn_threshold: 0.7,
            response_warn_ms: 2000,
            default_order_field: "id".to_string(),
        }
    }
}

impl DataServiceConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn cache_idle_eviction(&self) -> Duration {
        Duration::from_millis(self.cache_idle_eviction_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_connections == 0 {
            return Err(ConfigError::Invalid("min_connections 必须大于 0".into()));
        }
        if !(self.min_connections <= self.initial_max_connections
            && self.initial_max_connections <= self.max_connections)
        {
            return Err(ConfigError::Invalid(format!(
                "连接池上限需满足 {} <= {} <= {}",
                self.min_connections, self.initial_max_connections, self.max_connections
            )));
        }
        if self.fast_response_ms >= self.slow_response_ms {
            return Err(ConfigError::Invalid(format!(
                "fast_response_ms ({}) 必须小于 slow_response_ms ({})",
                self.fast_response_ms, self.slow_response_ms
            )));
        }
        for (name, value) in [
            ("memory_flush_threshold", self.memory_flush_threshold),
            ("memory_warn_threshold", self.memory_warn_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} 必须在 (0, 1] 区间内，当前为 {value}"
                )));
            }
        }
        for (name, value) in [
            ("cache_ttl_ms", self.cache_ttl_ms),
            ("maintenance_interval_ms", self.maintenance_interval_ms),
            ("metrics_interval_ms", self.metrics_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} 必须大于 0")));
            }
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity 必须大于 0".into()));
        }
        if self.default_order_field.trim().is_empty() {
            return Err(ConfigError::Invalid("default_order_field 不能为空".into()));
        }
        Ok(())
    }

    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文本解析并校验
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载，按扩展名选择格式（`.toml` / `.json`）
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            other => Err(ConfigError::Parse(format!(
                "不支持的配置文件格式: {}",
                other.unwrap_or("<无扩展名>")
            ))),
        }
    }
}
