//! 设备式读写端点
//!
//! 把共享命令环包装成类似字符设备的文件接口：
//! - 写入：字节先进暂存区，遇到 `\n` 才作为一条命令进环
//! - 读取：按逻辑偏移读取，每次最多返回一条命令的剩余部分
//! - 定位：`Seek` 以有效数据总长为文件大小，`seek_to` 按（命令序号，命令内偏移）定位

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use thiserror::Error;

use crate::record::{AccumulateError, Accumulator};
use crate::ring::RingError;
use crate::shared::{LockInterrupted, SharedRing};

/// 设备错误
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    Interrupted(#[from] LockInterrupted),
    #[error(transparent)]
    Accumulate(#[from] AccumulateError),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error("invalid seek to {position} (log holds {len} bytes)")]
    InvalidSeek { position: i128, len: u64 },
}

impl From<DeviceError> for io::Error {
    fn from(err: DeviceError) -> Self {
        let kind = match &err {
            DeviceError::Interrupted(_) => io::ErrorKind::Interrupted,
            DeviceError::Accumulate(_) => io::ErrorKind::OutOfMemory,
            DeviceError::Ring(_) | DeviceError::InvalidSeek { .. } => {
                io::ErrorKind::InvalidInput
            }
        };
        io::Error::new(kind, err)
    }
}

/// 设备本体，持有共享环
#[derive(Debug, Clone)]
pub struct LogDevice {
    ring: Arc<SharedRing>,
}

impl LogDevice {
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        let ring = SharedRing::with_capacity(capacity)?;
        Ok(Self::from_shared(Arc::new(ring)))
    }

    /// 与服务共用同一个环
    pub fn from_shared(ring: Arc<SharedRing>) -> Self {
        Self { ring }
    }

    pub fn ring(&self) -> &Arc<SharedRing> {
        &self.ring
    }

    /// 打开一个句柄，读位置为 0，暂存区为空
    pub fn open(&self) -> DeviceHandle {
        DeviceHandle {
            ring: self.ring.clone(),
            pending: Accumulator::new(),
            pos: 0,
        }
    }

    /// 从逻辑偏移读取，最多读到所在命令的末尾；超出有效数据返回 0
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        read_from(&self.ring, offset, buf)
    }

    /// 有效数据总字节数
    pub fn len(&self) -> Result<u64, DeviceError> {
        Ok(self.ring.lock()?.total_len() as u64)
    }

    pub fn is_empty(&self) -> Result<bool, DeviceError> {
        Ok(self.ring.lock()?.is_empty())
    }
}

/// 打开的设备句柄
///
/// 每个句柄有自己的读位置和暂存区；句柄关闭时未完成的命令被丢弃。
#[derive(Debug)]
pub struct DeviceHandle {
    ring: Arc<SharedRing>,
    pending: Accumulator,
    pos: u64,
}

impl DeviceHandle {
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// 暂存区中尚未提交的字节数
    pub fn pending(&self) -> usize {
        self.pending.pending()
    }

    /// 写入字节，返回提交进环的完整命令条数
    ///
    /// 分帧在锁外完成，锁只覆盖追加；被挤出的旧命令在锁释放后才析构。
    /// 取锁失败时撤销本次分帧，暂存区回到调用前的状态，调用方可原样重试。
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        let previous = self.pending.pending();
        let records = match self.pending.feed(data) {
            Ok(records) => records,
            Err(e) => {
                self.pending.discard();
                return Err(e.into());
            }
        };
        if records.is_empty() {
            return Ok(0);
        }

        let mut ring = match self.ring.lock() {
            Ok(ring) => ring,
            Err(e) => {
                self.pending.rollback(&records, previous);
                return Err(e.into());
            }
        };
        let committed = records.len();
        let evicted: Vec<_> = records
            .into_iter()
            .filter_map(|record| ring.append(record))
            .collect();
        drop(ring);
        drop(evicted);
        Ok(committed)
    }

    /// 定位到第 `command_index` 条命令内的 `byte_offset` 处
    pub fn seek_to(
        &mut self,
        command_index: usize,
        byte_offset: usize,
    ) -> Result<u64, DeviceError> {
        let position = self
            .ring
            .lock()?
            .resolve_position(command_index, byte_offset)?;
        self.pos = position as u64;
        Ok(self.pos)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let n = read_from(&self.ring, self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek_bytes(&mut self, pos: SeekFrom) -> Result<u64, DeviceError> {
        let len = self.ring.lock()?.total_len() as u64;
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => len as i128 + delta as i128,
        };
        if target < 0 || target > len as i128 {
            return Err(DeviceError::InvalidSeek {
                position: target,
                len,
            });
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

fn read_from(ring: &SharedRing, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
    let Ok(offset) = usize::try_from(offset) else {
        return Ok(0);
    };

    let ring = ring.lock()?;
    let Some((record, intra)) = ring.resolve_offset(offset) else {
        return Ok(0);
    };

    let available = &record.as_bytes()[intra..];
    let n = available.len().min(buf.len());
    buf[..n].copy_from_slice(&available[..n]);
    Ok(n)
}

impl Read for DeviceHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_bytes(buf)?)
    }
}

impl Write for DeviceHandle {
    /// 所有字节都被接收（进暂存区或进环），写入不移动读位置
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for DeviceHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_bytes(pos)?)
    }
}
