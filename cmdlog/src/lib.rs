//! cmdlog - 有界命令日志
//!
//! 特性：
//! - 固定槽位：最多保留 N 条命令，写满后挤出最旧的一条
//! - 所有权转移：被挤出的命令作为返回值交给调用方
//! - 逻辑寻址：所有有效命令从旧到新拼接成一段连续字节，可按偏移或（命令序号，偏移）定位
//! - 设备接口：`Read`/`Write`/`Seek` 句柄，写入按 `\n` 分帧

pub mod constants;
pub mod device;
pub mod record;
pub mod ring;
pub mod shared;


pub use constants::{DEFAULT_CAPACITY, TERMINATOR};
pub use device::{DeviceError, DeviceHandle, LogDevice};
pub use record::{AccumulateError, Accumulator, Record};
pub use ring::{RecordRing, RingError, RingStats};
pub use shared::{LockInterrupted, SharedRing};
