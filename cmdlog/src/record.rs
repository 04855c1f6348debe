//! 命令记录与暂存缓冲
//!
//! `Record` 是一条完整命令（含结束符）的字节，`Accumulator` 是单个写入方的
//! 暂存区：不断追加字节，遇到结束符时切出一条 `Record`。

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

use crate::constants::{INITIAL_PENDING_CAPACITY, TERMINATOR};

/// 暂存区错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccumulateError {
    #[error("out of memory growing pending command to {requested} bytes")]
    OutOfMemory { requested: usize },
}

/// 单条命令记录
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    data: Bytes,
}

impl Record {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// 共享底层缓冲的句柄（不拷贝数据）
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// 是否以结束符收尾
    pub fn is_terminated(&self) -> bool {
        self.data.last() == Some(&TERMINATOR)
    }
}

impl AsRef<[u8]> for Record {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for Record {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<String> for Record {
    fn from(text: String) -> Self {
        Self::new(text.into_bytes())
    }
}

impl From<&str> for Record {
    fn from(text: &str) -> Self {
        Self::new(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<&[u8]> for Record {
    fn from(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record({:?})", String::from_utf8_lossy(&self.data))
    }
}

/// 未完成命令的暂存区
///
/// 字节不断追加，直到出现结束符；`next_record` 每次切出一条完整命令
/// （包含结束符），剩余字节留给下一条。暂存区被丢弃时未完成的部分一并丢弃。
///
/// 出现结束符后，最后一个结束符之前的内容整体冻结为一块 `Bytes`，
/// 之后的命令都从这块缓冲上零拷贝切出；只有最后一个结束符之后的残余字节会被拷贝。
#[derive(Debug, Default)]
pub struct Accumulator {
    /// 已冻结、尚未取走的完整命令
    ready: Bytes,
    /// 最后一个结束符之后的字节
    buf: Vec<u8>,
    /// `buf` 中已扫描过、确认不含结束符的前缀长度
    scanned: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加字节，缓冲区按需增长
    pub fn push(&mut self, data: &[u8]) -> Result<(), AccumulateError> {
        if data.is_empty() {
            return Ok(());
        }

        let additional = if self.buf.capacity() == 0 {
            data.len().max(INITIAL_PENDING_CAPACITY)
        } else {
            data.len()
        };
        self.buf
            .try_reserve(additional)
            .map_err(|_| AccumulateError::OutOfMemory {
                requested: self.pending() + data.len(),
            })?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// 切出下一条完整命令，没有结束符时返回 None
    pub fn next_record(&mut self) -> Option<Record> {
        if self.ready.is_empty() {
            self.freeze_complete();
        }

        let pos = self.ready.iter().position(|&b| b == TERMINATOR)?;
        Some(Record::new(self.ready.split_to(pos + 1)))
    }

    /// 把 `buf` 中最后一个结束符之前的内容移入 `ready`
    fn freeze_complete(&mut self) {
        let found = self.buf[self.scanned..]
            .iter()
            .rposition(|&b| b == TERMINATOR);

        let Some(pos) = found else {
            self.scanned = self.buf.len();
            return;
        };

        let end = self.scanned + pos + 1;
        let rest = self.buf[end..].to_vec();
        self.buf.truncate(end);
        self.ready = Bytes::from(std::mem::replace(&mut self.buf, rest));
        self.scanned = self.buf.len();
    }

    /// 追加字节并取出所有完整命令
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Record>, AccumulateError> {
        self.push(data)?;
        let mut records = Vec::new();
        while let Some(record) = self.next_record() {
            records.push(record);
        }
        Ok(records)
    }

    /// 撤销一次 `feed`
    ///
    /// `previous` 为调用 `feed` 前的未完成字节数，`records` 为该次切出的命令。
    /// 调用前的未完成部分不含结束符，因此它一定是第一条切出命令的前缀；
    /// 没有切出命令时则是当前暂存内容的前缀。
    pub fn rollback(&mut self, records: &[Record], previous: usize) {
        match records.first() {
            Some(first) => {
                self.buf = first.as_bytes()[..previous.min(first.len())].to_vec();
            }
            None => self.buf.truncate(previous),
        }
        self.ready = Bytes::new();
        self.scanned = self.buf.len();
    }

    /// 尚未取走的字节数
    pub fn pending(&self) -> usize {
        self.ready.len() + self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.buf.is_empty()
    }

    /// 丢弃未完成部分
    pub fn discard(&mut self) {
        self.ready = Bytes::new();
        self.buf = Vec::new();
        self.scanned = 0;
    }
}
