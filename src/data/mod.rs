//! 数据访问层
//!
//! 在远端表查询接口之前加一层：结果缓存、同键请求去重、有界连接池和后台自适应维护。
//!
//! # 模块组织
//!
//! - `cache`: 缓存键派生与带 TTL 的 LRU 查询缓存
//! - `inflight`: 在途请求登记（去重）
//! - `pool`: FIFO 连接池，上限可在运行时调整
//! - `metrics`: 性能指标
//! - `maintenance`: 后台维护与指标汇报
//! - `fetcher`: 远端接口抽象和 HTTP 实现
//! - `service`: 统一入口 `DataService`
//!
//! # 使用示例
//!
//! ```rust
//! use std::sync::Arc;
//! use std::path::Path;
//! use stationops_data::data::{DataService, DataServiceConfig, HttpPageFetcher};
//!
//! let config = DataServiceConfig::load(Path::new("stationops.toml"))?;
//! let fetcher = Arc::new(HttpPageFetcher::new("https://backend.example.com/api/tables")?);
//! let service = DataService::builder(fetcher).config(config).start()?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod inflight;
pub mod maintenance;
pub mod memory;
pub mod metrics;
pub mod pool;
pub mod service;
pub mod shaping;

#[cfg(test)]
mod service_tests;

pub use cache::{derive_key, CacheKey, EntryStats, QueryCache};
pub use config::DataServiceConfig;
pub use error::{ConfigError, FetchError, Result};
pub use fetcher::{HttpPageFetcher, PageFetcher};
pub use maintenance::{retune_pool, MaintenanceReport};
pub use memory::{MemoryProbe, NoopMemoryProbe};
pub use metrics::{MetricsSnapshot, PerformanceMetrics};
pub use pool::{ConnectionPool, PoolPermit};
pub use service::{DataService, DataServiceBuilder};
pub use shaping::shape_query;
