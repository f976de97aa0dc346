//! 分页查询结果缓存
//!
//! 在 [`LruCache`] 之上提供线程安全的查询结果缓存，支持：
//! - 固定 TTL 过期 + 容量上限 LRU 淘汰
//! - 冷条目清理（访问次数少且长期未访问）
//! - 按表批量失效
//!
//! # 使用示例
//!
//! ```rust
//! use std::time::Duration;
//! use stationops_data::data::cache::{derive_key, QueryCache};
//! use stationops_data::models::{PageData, PageQuery};
//!
//! let cache = QueryCache::new(1000, Duration::from_secs(300));
//! let key = derive_key("employees", &PageQuery::new(1, 10), None, None)?;
//!
//! cache.write(key.clone(), PageData::default().into());
//! assert!(cache.is_valid(&key));
//!
//! // 员工表有写入后使其所有查询失效
//! cache.invalidate_table("employees");
//! ```

use super::{CacheKey, EntryStats, LruCache};
use crate::models::PageData;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// 查询结果缓存
#[derive(Debug, Clone)]
pub struct QueryCache {
    cache: Arc<RwLock<LruCache<CacheKey, Arc<PageData>>>>,
    /// 默认 TTL
    ttl: Duration,
}

impl QueryCache {
    /// 创建新的查询缓存
    ///
    /// # 参数
    ///
    /// - `capacity`: 缓存容量（最大查询数）
    /// - `ttl`: 默认生存时间
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(LruCache::new(capacity))),
            ttl,
        }
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, LruCache<CacheKey, Arc<PageData>>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, LruCache<CacheKey, Arc<PageData>>> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 条目存在且 `now < expires_at`
    pub fn is_valid(&self, key: &CacheKey) -> bool {
        self.read_lock().is_valid(key)
    }

    /// 读取条目并更新访问统计（不检查过期）
    pub fn read(&self, key: &CacheKey) -> Option<Arc<PageData>> {
        self.write_lock().read(key).cloned()
    }

    /// 原子地检查有效性并读取，缓存命中路径使用
    pub fn read_valid(&self, key: &CacheKey) -> Option<Arc<PageData>> {
        self.write_lock().read_valid(key).cloned()
    }

    /// 使用默认 TTL 写入
    pub fn write(&self, key: CacheKey, payload: Arc<PageData>) {
        self.write_with_ttl(key, payload, self.ttl);
    }

    /// 使用指定 TTL 写入，已存在则覆盖
    pub fn write_with_ttl(&self, key: CacheKey, payload: Arc<PageData>, ttl: Duration) {
        self.write_lock().write(key, payload, ttl);
    }

    /// 清理过期条目和冷条目，返回清理数量
    pub fn evict_stale(&self, idle: Duration, min_access: u64) -> usize {
        self.write_lock().evict_stale(idle, min_access)
    }

    /// 使某个表的所有查询失效，返回删除数量
    pub fn invalidate_table(&self, table: &str) -> usize {
        let removed = self.write_lock().retain_keys(|key| key.table() != table);
        if removed > 0 {
            tracing::debug!(table = %table, removed, "按表失效缓存");
        }
        removed
    }

    pub fn stats(&self, key: &CacheKey) -> Option<EntryStats> {
        self.read_lock().stats(key)
    }

    pub fn remove(&self, key: &CacheKey) -> Option<Arc<PageData>> {
        self.write_lock().remove(key)
    }

    /// 清空所有缓存，返回清空前的条目数
    pub fn clear(&self) -> usize {
        let mut cache = self.write_lock();
        let len = cache.len();
        cache.clear();
        len
    }

    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.read_lock().capacity()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
