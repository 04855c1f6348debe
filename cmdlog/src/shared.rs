//! 加锁共享的命令环
//!
//! 设备端点、网络服务和心跳共用同一个环；一把互斥锁串行化所有访问。
//! 锁只覆盖环的修改与快照拷贝，调用方不应在持锁期间做 I/O。

use bytes::Bytes;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::record::Record;
use crate::ring::{RecordRing, RingError, RingStats};

/// 取锁被打断（持锁线程 panic），重试即可
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("ring lock interrupted, retry the operation")]
pub struct LockInterrupted;

#[derive(Debug, Default)]
pub struct SharedRing {
    ring: Mutex<RecordRing>,
}

impl SharedRing {
    pub fn new(ring: RecordRing) -> Self {
        Self {
            ring: Mutex::new(ring),
        }
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, RingError> {
        Ok(Self::new(RecordRing::with_capacity(capacity)?))
    }

    /// 获取环的独占访问
    ///
    /// 上一个持锁者 panic 时返回 `LockInterrupted` 并清除中毒标记，
    /// 下一次调用可以正常拿到锁。环的每个修改操作都不会中途 panic，
    /// 因此中毒后的状态仍然一致。
    pub fn lock(&self) -> Result<MutexGuard<'_, RecordRing>, LockInterrupted> {
        match self.ring.lock() {
            Ok(guard) => Ok(guard),
            Err(poisoned) => {
                drop(poisoned);
                self.ring.clear_poison();
                Err(LockInterrupted)
            }
        }
    }

    /// 追加一条记录，返回被挤出的记录（锁已释放）
    pub fn append(&self, record: Record) -> Result<Option<Record>, LockInterrupted> {
        let mut ring = self.lock()?;
        Ok(ring.append(record))
    }

    /// 在同一临界区内追加并拷贝快照，快照一定包含本次追加
    pub fn append_and_snapshot(
        &self,
        record: Record,
    ) -> Result<(Option<Record>, Vec<Bytes>), LockInterrupted> {
        let mut ring = self.lock()?;
        let evicted = ring.append(record);
        Ok((evicted, ring.snapshot()))
    }

    pub fn snapshot(&self) -> Result<Vec<Bytes>, LockInterrupted> {
        Ok(self.lock()?.snapshot())
    }

    pub fn stats(&self) -> Result<RingStats, LockInterrupted> {
        Ok(self.lock()?.stats())
    }
}
