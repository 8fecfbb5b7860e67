//! 并发原语：Agent 生成并发上限 + 按键的互斥锁
//!
//! Agent 生成使用全局 Semaphore 限制并发（跨对话轮次共享）；
//! KeyedLocks 为文档级重排与章节级写入提供按 id 的互斥。
//! 加锁顺序固定为：章节锁 -> 文档锁，反向获取一律不允许。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

/// Agent 并发调度
#[derive(Clone)]
pub struct TaskScheduler {
    /// Agent 并发限制（默认 3）
    agent_semaphore: Arc<Semaphore>,
}

impl TaskScheduler {
    pub fn new(max_concurrent_agents: usize) -> Self {
        Self {
            agent_semaphore: Arc::new(Semaphore::new(max_concurrent_agents.max(1))),
        }
    }

    /// 获取一次 Agent 生成许可；信号量关闭时返回 None
    pub async fn acquire_agent(&self) -> Option<OwnedSemaphorePermit> {
        self.agent_semaphore.clone().acquire_owned().await.ok()
    }

    pub fn available_permits(&self) -> usize {
        self.agent_semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

/// 按 key 分配的异步互斥锁
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// 排队等待
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }

    /// 在 wait 内拿不到锁则返回 None；wait 为 0 时只尝试一次
    pub async fn lock_within(&self, key: &str, wait: Duration) -> Option<OwnedMutexGuard<()>> {
        let slot = self.slot(key);
        if wait.is_zero() {
            return slot.try_lock_owned().ok();
        }
        tokio::time::timeout(wait, slot.lock_owned()).await.ok()
    }

    /// 丢弃 key 对应的锁（实体删除后调用）
    pub fn forget(&self, key: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(key);
    }
}
