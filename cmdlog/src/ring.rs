//! 命令环
//!
//! 固定槽位数的循环存储，每个槽位放一条变长命令：
//! ```text
//! ┌────────┬────────┬────────┬────────┬────────┬────────┐
//! │ slot 0 │ slot 1 │ slot 2 │ slot 3 │  ...   │ slot N │
//! └────────┴────────┴────────┴────────┴────────┴────────┘
//!              ↑                  ↑
//!          read_index        write_index
//! ```
//! 有效记录为 `[read_index, write_index)`（取模），两者相等时靠 `full`
//! 区分空与满。所有有效记录按从旧到新拼接后构成逻辑地址空间。
//!
//! 本结构不做任何加锁，并发访问由调用方负责（见 `SharedRing`）。

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

use crate::constants::DEFAULT_CAPACITY;
use crate::record::Record;

/// 寻址错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("ring capacity must be at least 1")]
    ZeroCapacity,
    #[error("command index {index} out of range ({live} live commands)")]
    CommandOutOfRange { index: usize, live: usize },
    #[error("byte offset {offset} out of range for command {index} ({len} bytes)")]
    OffsetOutOfRange {
        index: usize,
        offset: usize,
        len: usize,
    },
}

/// 统计信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingStats {
    pub capacity: usize,
    pub live_records: usize,
    pub live_bytes: usize,
    pub total_appended: u64,
    pub total_evicted: u64,
}

impl fmt::Display for RingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} commands live ({} bytes), {} appended, {} evicted",
            self.live_records,
            self.capacity,
            self.live_bytes,
            self.total_appended,
            self.total_evicted
        )
    }
}

/// 命令环形缓冲
pub struct RecordRing {
    slots: Box<[Option<Record>]>,
    write_index: usize,
    read_index: usize,
    full: bool,
    total_appended: u64,
    total_evicted: u64,
}

impl RecordRing {
    /// 默认容量的空环
    pub fn new() -> Self {
        Self::empty(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }
        Ok(Self::empty(capacity))
    }

    fn empty(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            write_index: 0,
            read_index: 0,
            full: false,
            total_appended: 0,
            total_evicted: 0,
        }
    }

    /// 重置为空环，释放所有有效记录
    pub fn init(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.take();
        }
        self.write_index = 0;
        self.read_index = 0;
        self.full = false;
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.read_index == self.write_index
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// 有效记录条数
    pub fn len(&self) -> usize {
        if self.full {
            self.capacity()
        } else {
            (self.write_index + self.capacity() - self.read_index) % self.capacity()
        }
    }

    /// 有效记录总字节数（逻辑地址空间大小）
    pub fn total_len(&self) -> usize {
        self.iter().map(Record::len).sum()
    }

    /// 追加一条记录
    ///
    /// 环已满时最旧的记录被移出并返回，所有权交给调用方；
    /// 环内不再保留对它的任何引用。
    pub fn append(&mut self, record: Record) -> Option<Record> {
        let capacity = self.capacity();

        let evicted = if self.full {
            let oldest = self.slots[self.read_index].take();
            self.read_index = (self.read_index + 1) % capacity;
            self.total_evicted += 1;
            oldest
        } else {
            None
        };

        self.slots[self.write_index] = Some(record);
        self.write_index = (self.write_index + 1) % capacity;
        if self.write_index == self.read_index {
            self.full = true;
        }
        self.total_appended += 1;

        evicted
    }

    /// 从旧到新遍历有效记录
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            ring: self,
            index: self.read_index,
            done: self.is_empty(),
        }
    }

    /// 按逻辑偏移查找记录
    ///
    /// 返回包含该字节的记录及记录内偏移；空环或偏移超出有效数据时返回 None。
    pub fn resolve_offset(&self, byte_offset: usize) -> Option<(&Record, usize)> {
        if self.is_empty() {
            return None;
        }

        let mut start = 0;
        for record in self.iter() {
            let end = start + record.len();
            if byte_offset < end {
                return Some((record, byte_offset - start));
            }
            start = end;
        }
        None
    }

    /// 把（第几条命令，命令内偏移）换算成逻辑偏移
    ///
    /// `command_index` 以最旧的有效记录为 0。
    pub fn resolve_position(
        &self,
        command_index: usize,
        byte_offset: usize,
    ) -> Result<usize, RingError> {
        let live = self.len();
        if command_index >= live {
            return Err(RingError::CommandOutOfRange {
                index: command_index,
                live,
            });
        }

        let mut absolute = 0;
        for (index, record) in self.iter().enumerate() {
            if index == command_index {
                if byte_offset >= record.len() {
                    return Err(RingError::OffsetOutOfRange {
                        index,
                        offset: byte_offset,
                        len: record.len(),
                    });
                }
                return Ok(absolute + byte_offset);
            }
            absolute += record.len();
        }

        Err(RingError::CommandOutOfRange {
            index: command_index,
            live,
        })
    }

    /// 从逻辑偏移开始到末尾的数据分片（共享底层缓冲，不拷贝）
    pub fn snapshot_from(&self, byte_offset: usize) -> Vec<Bytes> {
        let mut chunks = Vec::with_capacity(self.len());
        let mut start = 0;
        for record in self.iter() {
            let end = start + record.len();
            if byte_offset < end {
                let skip = byte_offset.saturating_sub(start);
                chunks.push(record.bytes().slice(skip..));
            }
            start = end;
        }
        chunks
    }

    /// 全部有效数据的分片
    pub fn snapshot(&self) -> Vec<Bytes> {
        self.snapshot_from(0)
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            capacity: self.capacity(),
            live_records: self.len(),
            live_bytes: self.total_len(),
            total_appended: self.total_appended,
            total_evicted: self.total_evicted,
        }
    }
}

impl Default for RecordRing {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecordRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordRing")
            .field("capacity", &self.capacity())
            .field("read_index", &self.read_index)
            .field("write_index", &self.write_index)
            .field("full", &self.full)
            .field("records", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

/// 有效记录迭代器
///
/// 从 `read_index` 出发逐个前进（取模），回到 `write_index` 即结束；
/// 满环时恰好走完一整圈。
pub struct Iter<'a> {
    ring: &'a RecordRing,
    index: usize,
    done: bool,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Record;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let current = self.index;
            self.index = (self.index + 1) % self.ring.capacity();
            if self.index == self.ring.write_index {
                self.done = true;
            }
            if let Some(record) = self.ring.slots[current].as_ref() {
                return Some(record);
            }
        }
        None
    }
}

impl<'a> IntoIterator for &'a RecordRing {
    type Item = &'a Record;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
