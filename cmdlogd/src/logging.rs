//! 日志初始化
//!
//! 前台运行时输出到标准输出；指定了日志文件（或以守护进程运行）时
//! 经 `tracing_appender` 的后台线程追加写入文件。
//! 写文件的后台线程必须在 fork 之后创建，因此守护进程要先 `daemon()` 再调用 `init`。

use anyhow::Context;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::FmtSubscriber;

/// 以追加方式打开日志文件，必要时创建上级目录
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// 安装全局日志
///
/// 写文件时返回的 guard 要一直持有到进程退出，丢弃时会刷出剩余日志。
pub fn init(level: Level, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let builder = FmtSubscriber::builder().with_max_level(level);

    match log_file {
        Some(path) => {
            let file = open_log_file(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let subscriber = builder.with_ansi(false).with_writer(writer).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("setting default subscriber failed")?;
            Ok(Some(guard))
        }
        None => {
            let subscriber = builder.finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("setting default subscriber failed")?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_log_file_appends() {
        let dir = std::env::temp_dir().join(format!("cmdlogd_log_{}", std::process::id()));
        let path = dir.join("nested").join("cmdlogd.log");

        open_log_file(&path).unwrap().write_all(b"first\n").unwrap();
        open_log_file(&path).unwrap().write_all(b"second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");

        let _ = fs::remove_dir_all(&dir);
    }
}
