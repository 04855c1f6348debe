//! cmdlogd - 命令日志服务
//!
//! 监听 TCP 端口，把客户端发来的每条命令追加进有界命令环，并回送当前日志。
//!
//! 使用方法:
//!   cmdlogd                       # 前台运行，监听 0.0.0.0:9000
//!   cmdlogd -d                    # 绑定端口后转入后台，日志写入 /var/tmp/cmdlogd.log
//!   cmdlogd -l cmdlogd.log        # 前台运行，日志写入文件
//!   cmdlogd -C cmdlogd.json -p 9100 --no-heartbeat

use anyhow::{Context, Result};
use clap::Parser;
use cmdlogd::{logging, shutdown, LogService, ServiceConfig};
use std::path::PathBuf;
use tracing::{error, info, Level};

/// Command log server
#[derive(Parser, Debug)]
#[command(name = "cmdlogd")]
#[command(about = "Append newline-terminated commands to a bounded log and echo the log back")]
struct Args {
    /// Run as a daemon after the listening socket is bound
    #[arg(short, long)]
    daemon: bool,

    /// JSON config file; command line flags override its values
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of commands kept in the log
    #[arg(long)]
    capacity: Option<usize>,

    /// Heartbeat interval in seconds (0 = disabled)
    #[arg(long)]
    heartbeat_secs: Option<u64>,

    /// Disable the timestamp heartbeat
    #[arg(long, conflicts_with = "heartbeat_secs")]
    no_heartbeat: bool,

    /// Append log output to this file (daemon default: /var/tmp/cmdlogd.log)
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// 合并配置文件与命令行参数
    fn service_config(&self) -> Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ServiceConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(secs) = self.heartbeat_secs {
            config.heartbeat_secs = secs;
        }
        if self.no_heartbeat {
            config.heartbeat_secs = 0;
        }
        config.daemon |= self.daemon;
        if let Some(path) = &self.log_file {
            config.log_file = Some(path.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.service_config()?;

    // 先绑定端口，绑定失败时在前台报错退出
    let listener = std::net::TcpListener::bind(config.addr())
        .with_context(|| format!("Failed to bind {}", config.addr()))?;

    if config.daemon {
        daemonize()?;
    }

    // 设置日志（写文件的后台线程要在 fork 之后创建）
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let log_path = config.log_path();
    let _log_guard = logging::init(level, log_path.as_deref())?;
    if config.daemon {
        info!("cmdlogd: Running in background on {}", config.addr());
    }
    if let Some(path) = &log_path {
        info!("cmdlogd: Logging to {}", path.display());
    }

    // 运行时必须在 fork 之后创建
    listener
        .set_nonblocking(true)
        .context("Failed to set listener non-blocking")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    // 守护进程没有标准错误，退出原因也要进日志
    let result = runtime.block_on(serve(config, listener));
    if let Err(e) = &result {
        error!("cmdlogd: {:#}", e);
    }
    result
}

async fn serve(config: ServiceConfig, listener: std::net::TcpListener) -> Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    let service = LogService::new(config)?;

    let (stop_tx, stop_rx) = shutdown::channel();
    tokio::spawn(async move {
        match shutdown::wait_for_signal().await {
            Ok(()) => info!("Caught signal, exiting"),
            Err(e) => error!("cmdlogd: Signal handler failed: {}, exiting", e),
        }
        let _ = stop_tx.send(true);
    });

    let stats = service.run(listener, stop_rx).await?;
    info!("cmdlogd: Final log: {}", stats);
    Ok(())
}

#[cfg(unix)]
fn daemonize() -> Result<()> {
    // 保持工作目录，标准输入输出重定向到 /dev/null
    let ret = unsafe { libc::daemon(1, 0) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error()).context("Failed to daemonize");
    }
    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> Result<()> {
    anyhow::bail!("daemon mode is only supported on unix")
}
