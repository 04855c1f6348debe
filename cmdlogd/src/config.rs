//! 服务配置
//!
//! 可从 JSON 文件加载，缺省字段取默认值，命令行参数再覆盖文件中的值：
//! ```json
//! {
//!     "bind": "0.0.0.0",
//!     "port": 9000,
//!     "capacity": 10,
//!     "heartbeat_secs": 10,
//!     "daemon": false,
//!     "log_file": null
//! }
//! ```
//! 以守护进程运行且未指定 `log_file` 时，日志写入 `DEFAULT_DAEMON_LOG`。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::DEFAULT_PORT;

/// 心跳间隔（秒）
pub const DEFAULT_HEARTBEAT_SECS: u64 = 10;

/// 守护进程默认日志文件
pub const DEFAULT_DAEMON_LOG: &str = "/var/tmp/cmdlogd.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// 监听地址
    #[serde(default = "default_bind")]
    pub bind: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 环容量（保留的命令条数）
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// 心跳间隔（秒），0 表示关闭心跳
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// 是否以守护进程运行
    #[serde(default)]
    pub daemon: bool,
    /// 日志文件，缺省时前台输出到标准输出
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_capacity() -> usize {
    cmdlog::DEFAULT_CAPACITY
}

fn default_heartbeat_secs() -> u64 {
    DEFAULT_HEARTBEAT_SECS
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            capacity: default_capacity(),
            heartbeat_secs: default_heartbeat_secs(),
            daemon: false,
            log_file: None,
        }
    }
}

impl ServiceConfig {
    /// 从 JSON 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: ServiceConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.capacity == 0 {
            anyhow::bail!("capacity must be at least 1");
        }
        if self.bind.trim().is_empty() {
            anyhow::bail!("bind address must not be empty");
        }
        Ok(())
    }

    /// 监听地址 `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs))
    }

    /// 实际使用的日志文件；守护进程没有标准输出，必须落到文件
    pub fn log_path(&self) -> Option<PathBuf> {
        match &self.log_file {
            Some(path) => Some(path.clone()),
            None if self.daemon => Some(PathBuf::from(DEFAULT_DAEMON_LOG)),
            None => None,
        }
    }
}
