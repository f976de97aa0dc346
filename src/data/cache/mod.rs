//! 缓存层实现
//!
//! - `key`: 缓存键生成（规范化参数 + SHA-256 摘要）
//! - `lru`: 带访问统计的 LRU 缓存（容量限制 + 条目级 TTL）
//! - `query_cache`: 线程安全的分页查询结果缓存

pub mod key;
pub mod lru;
pub mod query_cache;

pub use key::{derive_key, CacheKey};
pub use lru::{EntryStats, LruCache};
pub use query_cache::QueryCache;
