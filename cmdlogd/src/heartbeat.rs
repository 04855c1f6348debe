//! 心跳
//!
//! 每隔固定间隔把当前时间格式化成一条命令追加进日志，不向任何连接发送数据。

use chrono::{DateTime, Local, TimeZone};
use cmdlog::{LockInterrupted, Record, SharedRing};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::shutdown::{self, ShutdownReceiver};

/// 时间戳格式（`YYYY-MM-DD HH:MM:SS`，本地时间）
pub const TIMESTAMP_FORMAT: &str = "timestamp:%F %T\n";

/// 把时间格式化成一条时间戳命令
pub fn timestamp_record<Tz: TimeZone>(now: &DateTime<Tz>) -> Record
where
    Tz::Offset: fmt::Display,
{
    Record::from(now.format(TIMESTAMP_FORMAT).to_string())
}

fn beat(ring: &SharedRing) -> Result<Option<Record>, LockInterrupted> {
    ring.append(timestamp_record(&Local::now()))
}

/// 运行心跳直到收到停止信号，返回追加的时间戳条数
pub async fn run_heartbeat(
    ring: Arc<SharedRing>,
    period: Duration,
    mut shutdown: ShutdownReceiver,
) -> u64 {
    info!("heartbeat: Appending a timestamp every {:?}", period);

    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut beats = 0u64;

    loop {
        tokio::select! {
            _ = shutdown::requested(&mut shutdown) => break,
            _ = ticker.tick() => match beat(&ring) {
                Ok(evicted) => {
                    beats += 1;
                    if let Some(old) = evicted {
                        debug!("heartbeat: Evicted oldest command ({} bytes)", old.len());
                    }
                }
                // 锁中断只影响本次，下个间隔照常
                Err(e) => warn!("heartbeat: {}", e),
            },
        }
    }

    info!("heartbeat: Stopped after {} timestamps", beats);
    beats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_timestamp_format() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();

        let record = timestamp_record(&now);
        assert_eq!(
            record.as_bytes(),
            b"timestamp:2024-03-01 12:30:05\n"
        );
        assert!(record.is_terminated());
    }

    #[tokio::test]
    async fn test_heartbeat_appends_until_stopped() {
        let ring = Arc::new(SharedRing::with_capacity(100).unwrap());
        let (stop_tx, stop_rx) = shutdown::channel();

        let handle = tokio::spawn(run_heartbeat(
            ring.clone(),
            Duration::from_millis(20),
            stop_rx,
        ));
        time::sleep(Duration::from_millis(150)).await;
        stop_tx.send(true).unwrap();
        let beats = handle.await.unwrap();

        assert!(beats >= 2, "only {} heartbeats", beats);
        let ring = ring.lock().unwrap();
        assert_eq!(ring.len() as u64, beats);
        for record in ring.iter() {
            assert!(record.as_bytes().starts_with(b"timestamp:"));
            assert!(record.is_terminated());
        }
    }

    #[tokio::test]
    async fn test_heartbeat_exits_when_already_stopped() {
        let ring = Arc::new(SharedRing::with_capacity(4).unwrap());
        let (stop_tx, stop_rx) = shutdown::channel();
        stop_tx.send(true).unwrap();

        let beats = run_heartbeat(ring.clone(), Duration::from_secs(10), stop_rx).await;
        assert_eq!(beats, 0);
        assert!(ring.lock().unwrap().is_empty());
    }
}
