//! 在途请求登记表
//!
//! 同一缓存键在途期间，后来的调用方直接等待已有请求的共享结果，
//! 保证并发的相同查询只触发一次远端调用。
//!
//! 每次登记分配递增 id：内存压力清空登记表后，同一键可能被重新登记，
//! 旧请求结束时只能移除属于自己的那条记录。

use super::error::Result;
use crate::models::PageData;
use futures_util::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::cache::CacheKey;

/// 可被多个调用方同时等待的请求结果
pub type SharedFetch = Shared<BoxFuture<'static, Result<Arc<PageData>>>>;

struct InFlightEntry {
    id: u64,
    fetch: SharedFetch,
}

/// 登记表内容，仅能通过 [`InFlightRegistry::lock`] 访问
#[derive(Default)]
pub struct InFlightMap {
    entries: HashMap<CacheKey, InFlightEntry>,
    next_id: u64,
}

impl InFlightMap {
    /// 获取已登记请求的共享结果
    pub fn get(&self, key: &CacheKey) -> Option<SharedFetch> {
        self.entries.get(key).map(|entry| entry.fetch.clone())
    }

    /// 分配下一个登记 id
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// 登记请求，覆盖同键旧记录
    pub fn register(&mut self, key: CacheKey, id: u64, fetch: SharedFetch) {
        self.entries.insert(key, InFlightEntry { id, fetch });
    }

    /// 请求结束时移除登记
    ///
    /// 返回 `false` 表示记录已不属于该请求（被清空或被新请求替换）。
    pub fn complete(&mut self, key: &CacheKey, id: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.id == id => {
                self.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 在途请求登记表
#[derive(Default)]
pub struct InFlightRegistry {
    inner: Mutex<InFlightMap>,
}

impl std::fmt::Debug for InFlightRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 锁定登记表；持锁期间不得 await
    pub fn lock(&self) -> MutexGuard<'_, InFlightMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 清空登记（不会取消已在执行的请求），返回清空前的数量
    pub fn clear(&self) -> usize {
        let mut map = self.lock();
        let len = map.entries.len();
        map.entries.clear();
        len
    }
}
