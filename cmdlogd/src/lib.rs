//! 命令日志服务库
//!
//! 在 TCP 上提供 `cmdlog` 命令环：客户端发送以 `\n` 结束的命令，
//! 服务把命令追加进共享环并回送当前全部日志；定位命令改为回送定位点之后的内容。
//!
//! # 示例
//!
//! ```rust,no_run
//! use cmdlogd::{shutdown, LogService, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::default();
//!     let listener = tokio::net::TcpListener::bind(config.addr()).await?;
//!     let service = LogService::new(config)?;
//!
//!     let (stop_tx, stop_rx) = shutdown::channel();
//!     tokio::spawn(async move {
//!         let _ = shutdown::wait_for_signal().await;
//!         let _ = stop_tx.send(true);
//!     });
//!
//!     let stats = service.run(listener, stop_rx).await?;
//!     println!("{}", stats);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod heartbeat;
pub mod logging;
pub mod protocol;
pub mod service;
pub mod shutdown;

pub use config::{ServiceConfig, DEFAULT_DAEMON_LOG, DEFAULT_HEARTBEAT_SECS};
pub use heartbeat::{run_heartbeat, timestamp_record, TIMESTAMP_FORMAT};
pub use protocol::{
    error_reply, Command, FrameError, Framer, DEFAULT_PORT, RECV_CHUNK_SIZE, SEEK_PREFIX,
};
pub use service::{Connection, LogService, ServiceError};
