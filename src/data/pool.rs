//! 连接池：限制同时在途的远端请求数
//!
//! 活跃数小于上限且无人排队时立即放行，否则进入 FIFO 等待队列。
//! 请求结束时（无论成败）由 [`PoolPermit`] 的 drop 归还名额并唤醒队首等待者。
//! 上限可在运行时调整，但始终被限制在 `[min, max]` 区间内。
//!
//! 名额采用"移交"方式：唤醒等待者时活跃数不减，直接转给被唤醒者，
//! 因此不会出现新到请求插队的情况。

use super::error::{FetchError, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Debug)]
struct PoolState {
    active: usize,
    max_connections: usize,
    queue: VecDeque<oneshot::Sender<()>>,
    closed: bool,
}

impl PoolState {
    /// 在容量允许时按到达顺序唤醒等待者
    fn dispatch(&mut self) {
        while self.active < self.max_connections {
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            self.active += 1;
            if waiter.send(()).is_err() {
                // 等待者已放弃，名额收回
                self.active -= 1;
            }
        }
    }
}

#[derive(Debug)]
struct PoolInner {
    state: Mutex<PoolState>,
    min_connections: usize,
    max_connections: usize,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        state.dispatch();
    }
}

/// 连接池
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

/// 连接池名额，drop 时归还
#[derive(Debug)]
pub struct PoolPermit {
    inner: Arc<PoolInner>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// 排队中的等待者
///
/// 若在拿到名额后、被轮询之前被 drop，负责把名额还回去。
struct QueuedWaiter {
    inner: Arc<PoolInner>,
    receiver: oneshot::Receiver<()>,
    done: bool,
}

impl QueuedWaiter {
    async fn wait(mut self) -> Result<PoolPermit> {
        let outcome = (&mut self.receiver).await;
        self.done = true;
        match outcome {
            Ok(()) => Ok(PoolPermit {
                inner: Arc::clone(&self.inner),
            }),
            Err(_) => Err(FetchError::PoolClosed),
        }
    }
}

impl Drop for QueuedWaiter {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.receiver.close();
        if self.receiver.try_recv().is_ok() {
            self.inner.release();
        }
    }
}

impl ConnectionPool {
    /// 创建连接池，`initial` 会被限制在 `[min, max]` 内
    pub fn new(initial: usize, min: usize, max: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    active: 0,
                    max_connections: initial.clamp(min, max),
                    queue: VecDeque::new(),
                    closed: false,
                }),
                min_connections: min,
                max_connections: max,
            }),
        }
    }

    /// 获取一个名额，必要时排队等待
    pub async fn acquire(&self) -> Result<PoolPermit> {
        let receiver = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(FetchError::PoolClosed);
            }
            if state.active < state.max_connections && state.queue.is_empty() {
                state.active += 1;
                return Ok(PoolPermit {
                    inner: Arc::clone(&self.inner),
                });
            }

            let (sender, receiver) = oneshot::channel();
            state.queue.push_back(sender);
            tracing::trace!(
                active = state.active,
                queued = state.queue.len(),
                "连接池已满，请求进入等待队列"
            );
            receiver
        };

        QueuedWaiter {
            inner: Arc::clone(&self.inner),
            receiver,
            done: false,
        }
        .wait()
        .await
    }

    /// 获取名额后执行任务，任务结束（无论成败）即归还名额
    pub async fn acquire_and_run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(task.await)
    }

    /// 当前并发上限
    pub fn max_connections(&self) -> usize {
        self.inner.lock().max_connections
    }

    /// 设置并发上限（会被限制在 `[min, max]` 内），返回实际生效的值
    ///
    /// 上限提高时立即唤醒排队的请求；降低时不会中断在途请求，
    /// 只是在活跃数回落到新上限以下之前不再放行。
    pub fn set_max_connections(&self, value: usize) -> usize {
        let mut state = self.inner.lock();
        state.max_connections = value.clamp(self.inner.min_connections, self.inner.max_connections);
        state.dispatch();
        state.max_connections
    }

    pub fn active(&self) -> usize {
        self.inner.lock().active
    }

    /// 排队中的请求数，已放弃等待的请求不计入
    pub fn queued(&self) -> usize {
        let mut state = self.inner.lock();
        state.queue.retain(|waiter| !waiter.is_closed());
        state.queue.len()
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.inner.min_connections, self.inner.max_connections)
    }

    /// 关闭连接池：拒绝新请求，排队中的请求以 `PoolClosed` 失败
    pub fn close(&self) {
        let mut state = self.inner.lock();
        state.closed = true;
        let dropped = state.queue.len();
        state.queue.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "连接池关闭，丢弃排队请求");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
