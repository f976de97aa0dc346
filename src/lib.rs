// lib.rs - 暴露数据访问层给宿主应用使用

pub mod core;
pub mod data;
pub mod models;

pub use core::{init_logger, update_log_level};
pub use data::{
    ConfigError, DataService, DataServiceBuilder, DataServiceConfig, FetchError, HttpPageFetcher,
    MemoryProbe, MetricsSnapshot, PageFetcher,
};
pub use models::*;
