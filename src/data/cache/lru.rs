//! 带访问统计的 LRU 缓存
//!
//! 在 LRU 淘汰的基础上为每个条目记录：
//! - 创建时间和绝对过期时间（每个条目可有不同 TTL）
//! - 访问次数和最近访问时间（用于清理冷条目）
//!
//! 时间取自 `tokio::time::Instant`，测试中可通过暂停时钟精确推进。

use linked_hash_map::LinkedHashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// 缓存条目，包含值和访问统计
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    expires_at: Instant,
    access_count: u64,
    last_accessed: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            expires_at: now + ttl,
            access_count: 1,
            last_accessed: now,
        }
    }

    fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// 访问次数不足且长时间未访问
    fn is_cold_at(&self, now: Instant, idle: Duration, min_access: u64) -> bool {
        self.access_count < min_access && now.duration_since(self.last_accessed) > idle
    }
}

/// 条目统计快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStats {
    pub created_at: Instant,
    pub expires_at: Instant,
    pub access_count: u64,
    pub last_accessed: Instant,
}

/// LRU 缓存实现
///
/// 使用 `LinkedHashMap` 维护访问顺序，链表头部为最久未使用的条目。
#[derive(Debug)]
pub struct LruCache<K: Eq + Hash, V> {
    cache: LinkedHashMap<K, CacheEntry<V>>,
    capacity: usize,
}

impl<K: Eq + Hash, V> LruCache<K, V> {
    /// 创建容量为 `capacity` 的缓存
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LinkedHashMap::new(),
            capacity,
        }
    }

    /// 条目存在且未过期
    pub fn is_valid(&self, key: &K) -> bool {
        let now = Instant::now();
        self.cache
            .get(key)
            .is_some_and(|entry| entry.is_valid_at(now))
    }

    /// 读取条目（不检查过期），累加访问次数并刷新 LRU 位置
    pub fn read(&mut self, key: &K) -> Option<&V> {
        let now = Instant::now();
        let entry = self.cache.get_refresh(key)?;
        entry.access_count += 1;
        entry.last_accessed = now;
        Some(&entry.value)
    }

    /// 仅当条目未过期时读取，语义等同于 `is_valid` + `read`
    pub fn read_valid(&mut self, key: &K) -> Option<&V> {
        if !self.is_valid(key) {
            return None;
        }
        self.read(key)
    }

    /// 写入条目，已存在则覆盖并重置统计
    ///
    /// 超过容量时淘汰最久未使用的条目。
    pub fn write(&mut self, key: K, value: V, ttl: Duration) {
        self.cache.remove(&key);

        if self.cache.len() >= self.capacity {
            self.cache.pop_front();
        }

        self.cache
            .insert(key, CacheEntry::new(value, ttl, Instant::now()));
    }

    /// 清理过期条目和冷条目，返回清理数量
    pub fn evict_stale(&mut self, idle: Duration, min_access: u64) -> usize {
        let now = Instant::now();
        self.retain(|_, entry| entry.is_valid_at(now) && !entry.is_cold_at(now, idle, min_access))
    }

    /// 按键保留条目，返回被删除的数量
    pub fn retain_keys<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        self.retain(|key, _| keep(key))
    }

    fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&K, &CacheEntry<V>) -> bool,
    {
        let before = self.cache.len();
        // LinkedHashMap 没有 retain，逐个弹出再按原顺序放回
        let mut kept = LinkedHashMap::with_capacity(before);
        while let Some((key, entry)) = self.cache.pop_front() {
            if keep(&key, &entry) {
                kept.insert(key, entry);
            }
        }
        self.cache = kept;
        before - self.cache.len()
    }

    /// 查看条目统计（不影响 LRU 顺序和访问次数）
    pub fn stats(&self, key: &K) -> Option<EntryStats> {
        self.cache.get(key).map(|entry| EntryStats {
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            access_count: entry.access_count,
            last_accessed: entry.last_accessed,
        })
    }

    /// 删除指定键，返回被删除的值（如果存在）
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.cache.remove(key).map(|entry| entry.value)
    }

    /// 清空所有缓存
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
