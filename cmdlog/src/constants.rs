//! 常量定义
//!
//! 命令环形日志的容量与分帧相关常量

/// 默认环容量（同时保留的命令条数）
pub const DEFAULT_CAPACITY: usize = 10;

/// 命令结束符
pub const TERMINATOR: u8 = b'\n';

/// 暂存缓冲区首次分配大小（字节）
pub const INITIAL_PENDING_CAPACITY: usize = 128;
