//! 命令日志服务
//!
//! 每个连接一个任务，加一个心跳任务，共享同一个加锁的命令环。
//! 连接状态机：
//! ```text
//! Accumulating ──\n──▶ Appending ──▶ Replying ──▶ Accumulating ...
//!      │                                              
//!      └── EOF / 停止信号 ──▶ Closed（未完成的命令直接丢弃）
//! ```
//! 锁只覆盖"追加 + 快照拷贝"，网络发送在锁外进行，慢连接不会阻塞其他连接。

use bytes::Bytes;
use cmdlog::{LockInterrupted, LogDevice, Record, RecordRing, RingError, RingStats, SharedRing};
use std::net::SocketAddr;
use std::sync::{Arc, MutexGuard};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::heartbeat;
use crate::protocol::{self, Command, FrameError, Framer, RECV_CHUNK_SIZE};
use crate::shutdown::{self, ShutdownReceiver};

/// 服务错误
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("ring error: {0}")]
    Ring(#[from] RingError),
}

/// 命令日志服务
pub struct LogService {
    config: ServiceConfig,
    ring: Arc<SharedRing>,
}

impl LogService {
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ring = Arc::new(SharedRing::with_capacity(config.capacity)?);
        Ok(Self { config, ring })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// 共享环的句柄
    pub fn ring(&self) -> Arc<SharedRing> {
        self.ring.clone()
    }

    /// 以设备接口访问同一个环
    pub fn device(&self) -> LogDevice {
        LogDevice::from_shared(self.ring.clone())
    }

    /// 运行服务直到 `shutdown` 变为 true（或发送端被丢弃）
    ///
    /// 停止顺序：先停心跳并等待其退出，再停止接受新连接，
    /// 最后等待所有连接处理完当前命令。
    pub async fn run(
        &self,
        listener: TcpListener,
        mut shutdown: ShutdownReceiver,
    ) -> Result<RingStats, ServiceError> {
        info!("cmdlogd: Listening on {}", listener.local_addr()?);

        let heartbeat = self.config.heartbeat_interval().map(|period| {
            tokio::spawn(heartbeat::run_heartbeat(
                self.ring.clone(),
                period,
                shutdown.clone(),
            ))
        });

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown::requested(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Accepted connection from {}", peer.ip());
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            self.ring.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!("cmdlogd: Accept failed: {}", e),
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("cmdlogd: Connection task failed: {}", e);
                    }
                }
            }
        }

        info!("cmdlogd: Shutting down");

        if let Some(handle) = heartbeat {
            if let Err(e) = handle.await {
                error!("cmdlogd: Heartbeat task failed: {}", e);
            }
        }

        drop(listener);

        let remaining = connections.len();
        if remaining > 0 {
            info!("cmdlogd: Waiting for {} connections to finish", remaining);
        }
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                error!("cmdlogd: Connection task failed: {}", e);
            }
        }

        let stats = lock_ring(&self.ring).stats();
        info!("cmdlogd: Stopped. {}", stats);
        Ok(stats)
    }
}

/// 取环锁，锁中断时重试
///
/// 中断后中毒标记已被清除，重试一次即可拿到锁。
fn lock_ring(ring: &SharedRing) -> MutexGuard<'_, RecordRing> {
    loop {
        match ring.lock() {
            Ok(guard) => return guard,
            Err(LockInterrupted) => warn!("cmdlogd: Ring lock interrupted, retrying"),
        }
    }
}

/// 追加并拷贝快照；被挤出的命令在锁释放后析构
fn append_and_snapshot(ring: &SharedRing, record: Record) -> Vec<Bytes> {
    let mut guard = lock_ring(ring);
    let evicted = guard.append(record);
    let snapshot = guard.snapshot();
    drop(guard);

    if let Some(old) = evicted {
        debug!("cmdlogd: Evicted oldest command ({} bytes)", old.len());
    }
    snapshot
}

/// 定位并拷贝定位点之后的内容
fn seek_and_snapshot(
    ring: &SharedRing,
    command_index: usize,
    byte_offset: usize,
) -> Result<(usize, Vec<Bytes>), RingError> {
    let guard = lock_ring(ring);
    let position = guard.resolve_position(command_index, byte_offset)?;
    Ok((position, guard.snapshot_from(position)))
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ring: Arc<SharedRing>,
    mut shutdown: ShutdownReceiver,
) {
    let mut conn = Connection::new(ring);
    if let Err(e) = conn.serve(&mut stream, &mut shutdown).await {
        warn!("Connection from {} failed: {}", peer.ip(), e);
    }
    debug!("cmdlogd: {} handled {} commands", peer, conn.commands);
    info!("Closed connection from {}", peer.ip());
}

/// 单个连接的状态
pub struct Connection {
    ring: Arc<SharedRing>,
    framer: Framer,
    commands: u64,
}

impl Connection {
    pub fn new(ring: Arc<SharedRing>) -> Self {
        Self {
            ring,
            framer: Framer::new(),
            commands: 0,
        }
    }

    /// 处理连接直到对端关闭或收到停止信号
    ///
    /// 已收齐的命令总会完整地走完追加和回复；停止信号只在等待数据时生效，
    /// 此时未完成的命令被丢弃，环不受影响。
    pub async fn serve(
        &mut self,
        stream: &mut TcpStream,
        shutdown: &mut ShutdownReceiver,
    ) -> Result<(), ServiceError> {
        let mut read_buf = [0u8; RECV_CHUNK_SIZE];

        loop {
            while let Some(next) = self.framer.next_command() {
                match next {
                    Ok(command) => self.dispatch(command, stream).await?,
                    Err(e) => {
                        warn!("cmdlogd: Rejected command: {}", e);
                        stream.write_all(&protocol::error_reply(&e)).await?;
                    }
                }
                if *shutdown.borrow() {
                    return Ok(());
                }
            }

            let n = tokio::select! {
                received = stream.read(&mut read_buf) => received?,
                _ = shutdown::requested(shutdown) => {
                    if self.framer.pending() > 0 {
                        debug!(
                            "cmdlogd: Discarding {} pending bytes on shutdown",
                            self.framer.pending()
                        );
                    }
                    return Ok(());
                }
            };

            if n == 0 {
                if self.framer.pending() > 0 {
                    debug!(
                        "cmdlogd: Peer closed with {} bytes of incomplete command, discarded",
                        self.framer.pending()
                    );
                }
                return Ok(());
            }

            self.framer.push(&read_buf[..n])?;
        }
    }

    async fn dispatch(
        &mut self,
        command: Command,
        stream: &mut TcpStream,
    ) -> Result<(), ServiceError> {
        debug!("cmdlogd: {}", command);
        self.commands += 1;

        match command {
            Command::Data(record) => {
                let reply = append_and_snapshot(&self.ring, record);
                send_chunks(stream, &reply).await
            }
            Command::Seek {
                command_index,
                byte_offset,
            } => match seek_and_snapshot(&self.ring, command_index, byte_offset) {
                // 定位只影响这一次回复，之后的普通命令照常回送全部日志
                Ok((position, reply)) => {
                    debug!("cmdlogd: Seek resolved to offset {}", position);
                    send_chunks(stream, &reply).await
                }
                Err(e) => {
                    warn!("cmdlogd: Seek rejected: {}", e);
                    stream.write_all(&protocol::error_reply(&e)).await?;
                    Ok(())
                }
            },
        }
    }
}

async fn send_chunks(stream: &mut TcpStream, chunks: &[Bytes]) -> Result<(), ServiceError> {
    for chunk in chunks {
        stream.write_all(chunk).await?;
    }
    stream.flush().await?;
    Ok(())
}
