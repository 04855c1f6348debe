//! 并发追加测试
//!
//! 多个线程同时向共享环追加带唯一标签的命令，验证：
//! 1. 有效记录 + 被挤出记录 恰好覆盖全部标签，无重复、无丢失
//! 2. 并发读到的快照总是由完整命令组成

use cmdlog::{LogDevice, Record, SharedRing};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;

/// 启动 `writers` 个线程各追加一条命令，返回（有效标签，被挤出标签）
fn append_concurrently(capacity: usize, writers: usize) -> (Vec<String>, Vec<String>) {
    let shared = Arc::new(SharedRing::with_capacity(capacity).unwrap());

    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let shared = shared.clone();
            thread::spawn(move || {
                shared
                    .append(Record::from(format!("tag-{}\n", i)))
                    .unwrap()
            })
        })
        .collect();

    let evicted: Vec<String> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .map(|r| String::from_utf8(r.as_bytes().to_vec()).unwrap())
        .collect();

    let ring = shared.lock().unwrap();
    let live: Vec<String> = ring
        .iter()
        .map(|r| String::from_utf8(r.as_bytes().to_vec()).unwrap())
        .collect();

    (live, evicted)
}

fn assert_each_tag_once(writers: usize, live: &[String], evicted: &[String]) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for tag in live.iter().chain(evicted.iter()) {
        *seen.entry(tag.as_str()).or_insert(0) += 1;
    }

    assert_eq!(seen.len(), writers, "some tag was lost");
    for i in 0..writers {
        let tag = format!("tag-{}\n", i);
        assert_eq!(seen.get(tag.as_str()), Some(&1), "{:?} not seen once", tag);
    }
}

#[test]
fn test_concurrent_appends_with_eviction() {
    let writers = 64;
    let (live, evicted) = append_concurrently(10, writers);

    println!("live={} evicted={}", live.len(), evicted.len());
    assert_eq!(live.len(), 10);
    assert_eq!(evicted.len(), writers - 10);
    assert_each_tag_once(writers, &live, &evicted);
}

#[test]
fn test_concurrent_appends_without_eviction() {
    let writers = 16;
    let (live, evicted) = append_concurrently(32, writers);

    assert_eq!(live.len(), writers);
    assert!(evicted.is_empty());
    assert_each_tag_once(writers, &live, &evicted);
}

#[test]
fn test_snapshots_hold_whole_commands() {
    let shared = Arc::new(SharedRing::with_capacity(8).unwrap());

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let shared = shared.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let cmd = format!("writer {} command {}\n", w, i);
                    shared.append(Record::from(cmd)).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let chunks = shared.snapshot().unwrap();
                    assert!(chunks.len() <= 8);
                    for chunk in &chunks {
                        assert!(chunk.starts_with(b"writer "));
                        assert_eq!(chunk.last(), Some(&b'\n'));
                    }
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    let stats = shared.stats().unwrap();
    println!("{}", stats);
    assert_eq!(stats.total_appended, 800);
    assert_eq!(stats.total_evicted, 792);
    assert_eq!(stats.live_records, 8);
}

#[test]
fn test_device_handles_interleaved_writes() {
    let device = LogDevice::new(100).unwrap();

    // 每个句柄分多次写入同一条命令，句柄之间互不串扰
    let handles: Vec<_> = (0..8)
        .map(|w| {
            let device = device.clone();
            thread::spawn(move || {
                let mut handle = device.open();
                for i in 0..5 {
                    write!(handle, "dev{}-", w).unwrap();
                    write!(handle, "{}", i).unwrap();
                    handle.write_all(b"\n").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut content = String::new();
    device.open().read_to_string(&mut content).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 40);
    for w in 0..8 {
        for i in 0..5 {
            let line = format!("dev{}-{}", w, i);
            assert_eq!(lines.iter().filter(|l| **l == line).count(), 1);
        }
    }
}
