//! 命令分帧协议
//!
//! 传输层是原始字节流，`\n` 结束一条命令：
//! ```text
//! <任意字节...>\n                              普通命令，追加进日志并回送全部日志
//! AESDCHAR_IOCSEEKTO:<command_index>,<offset>\n 定位命令，不追加，回送定位点之后的内容
//! ```
//! 每条完整的行在分帧层就被区分为 `Command::Data` 或 `Command::Seek`，
//! 追加路径不再做任何文本匹配。

use cmdlog::{AccumulateError, Accumulator, Record};
use std::fmt;
use thiserror::Error;

/// 默认端口
pub const DEFAULT_PORT: u16 = 9000;

/// 定位命令前缀
pub const SEEK_PREFIX: &[u8] = b"AESDCHAR_IOCSEEKTO:";

/// 单次接收的最大字节数
pub const RECV_CHUNK_SIZE: usize = 1024;

/// 分帧错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed seek command: {0}")]
    MalformedSeek(String),
    #[error(transparent)]
    Accumulate(#[from] AccumulateError),
}

/// 一条完整的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 普通命令（含结束符）
    Data(Record),
    /// 定位到第 `command_index` 条命令内的 `byte_offset`
    Seek {
        command_index: usize,
        byte_offset: usize,
    },
}

impl Command {
    /// 对一条完整的行分类
    pub fn classify(line: Record) -> Result<Command, FrameError> {
        match line.as_bytes().strip_prefix(SEEK_PREFIX) {
            Some(args) => parse_seek_args(args),
            None => Ok(Command::Data(line)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Data(record) => write!(f, "DATA({} bytes)", record.len()),
            Command::Seek {
                command_index,
                byte_offset,
            } => write!(f, "SEEK({},{})", command_index, byte_offset),
        }
    }
}

fn parse_seek_args(args: &[u8]) -> Result<Command, FrameError> {
    let text = std::str::from_utf8(args)
        .map_err(|_| FrameError::MalformedSeek("arguments are not valid UTF-8".to_string()))?;
    let text = text.trim_end_matches(['\n', '\r']);

    let (index, offset) = text.split_once(',').ok_or_else(|| {
        FrameError::MalformedSeek(format!("expected <index>,<offset>, got {:?}", text))
    })?;

    let command_index = index.trim().parse::<usize>().map_err(|e| {
        FrameError::MalformedSeek(format!("invalid command index {:?}: {}", index, e))
    })?;
    let byte_offset = offset.trim().parse::<usize>().map_err(|e| {
        FrameError::MalformedSeek(format!("invalid byte offset {:?}: {}", offset, e))
    })?;

    Ok(Command::Seek {
        command_index,
        byte_offset,
    })
}

/// 单个连接的分帧器
#[derive(Debug, Default)]
pub struct Framer {
    pending: Accumulator,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加收到的字节；分配失败时丢弃未完成的命令
    pub fn push(&mut self, data: &[u8]) -> Result<(), FrameError> {
        if let Err(e) = self.pending.push(data) {
            self.pending.discard();
            return Err(e.into());
        }
        Ok(())
    }

    /// 取出下一条完整命令，数据不足时返回 None
    pub fn next_command(&mut self) -> Option<Result<Command, FrameError>> {
        self.pending.next_record().map(Command::classify)
    }

    /// 未完成命令的字节数
    pub fn pending(&self) -> usize {
        self.pending.pending()
    }
}

/// 错误回复
pub fn error_reply(err: &impl fmt::Display) -> Vec<u8> {
    format!("ERROR: {}\n", err).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_data() {
        let cmd = Command::classify(Record::from("hello world\n")).unwrap();
        assert_eq!(cmd, Command::Data(Record::from("hello world\n")));
    }

    #[test]
    fn test_classify_seek() {
        let cmd = Command::classify(Record::from("AESDCHAR_IOCSEEKTO:2,5\n")).unwrap();
        assert_eq!(
            cmd,
            Command::Seek {
                command_index: 2,
                byte_offset: 5
            }
        );

        let cmd = Command::classify(Record::from("AESDCHAR_IOCSEEKTO: 0 , 1\r\n")).unwrap();
        assert_eq!(
            cmd,
            Command::Seek {
                command_index: 0,
                byte_offset: 1
            }
        );
    }

    #[test]
    fn test_classify_malformed_seek() {
        for line in [
            "AESDCHAR_IOCSEEKTO:\n",
            "AESDCHAR_IOCSEEKTO:1\n",
            "AESDCHAR_IOCSEEKTO:a,1\n",
            "AESDCHAR_IOCSEEKTO:1,-2\n",
            "AESDCHAR_IOCSEEKTO:1,2,3\n",
        ] {
            let err = Command::classify(Record::from(line)).unwrap_err();
            assert!(
                matches!(err, FrameError::MalformedSeek(_)),
                "{:?} -> {:?}",
                line,
                err
            );
        }
    }

    #[test]
    fn test_prefix_elsewhere_is_data() {
        let line = Record::from("echo AESDCHAR_IOCSEEKTO:1,2\n");
        assert!(matches!(
            Command::classify(line).unwrap(),
            Command::Data(_)
        ));
    }

    #[test]
    fn test_framer_splits_lines() {
        let mut framer = Framer::new();
        framer.push(b"one\ntw").unwrap();

        assert_eq!(
            framer.next_command().unwrap().unwrap(),
            Command::Data(Record::from("one\n"))
        );
        assert!(framer.next_command().is_none());
        assert_eq!(framer.pending(), 2);

        framer.push(b"o\nAESDCHAR_IOCSEEKTO:0,1\n").unwrap();
        assert_eq!(
            framer.next_command().unwrap().unwrap(),
            Command::Data(Record::from("two\n"))
        );
        assert_eq!(
            framer.next_command().unwrap().unwrap(),
            Command::Seek {
                command_index: 0,
                byte_offset: 1
            }
        );
        assert!(framer.next_command().is_none());
    }

    #[test]
    fn test_error_reply() {
        let reply = error_reply(&"bad seek");
        assert_eq!(reply, b"ERROR: bad seek\n");
    }
}
