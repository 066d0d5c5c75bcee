//! 采样写入模拟测试
//!
//! 测试流程：
//! 1. 在临时目录上挂载存储并初始化日志
//! 2. 按 1 秒间隔模拟功率采样，持续写入直到多次轮转
//! 3. 中途模拟进程重启（新建日志对象重新初始化）
//! 4. 检查表头、容量上限和保留记录的连续性

use datalog::{BoundedLog, DirStorage, Record};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const HEADER: &str = "timestamp,voltage,current,power\n";
const CAPACITY: u64 = 8 * 1024;
const START_TS: u64 = 1_700_000_000;

/// 模拟电源采样：电压 5V 附近波动，电流随时间变化
fn sample(i: u64) -> Record {
    let voltage = 5.0 + ((i % 17) as f64 - 8.0) * 0.01;
    let current = 0.5 + (i % 100) as f64 * 0.013;
    Record::new(START_TS + i, voltage, current, voltage * current)
}

fn open_log(base: &Path) -> BoundedLog<DirStorage> {
    let storage = DirStorage::new(base, true);
    let mut log = BoundedLog::new(storage, "datalog.csv", HEADER, CAPACITY).unwrap();
    log.initialize().unwrap();
    log
}

#[test]
fn test_long_running_sampling() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("littlefs");

    let total = 2000u64;
    let restart_at = 1200u64;

    let mut log = open_log(&base);
    for i in 0..total {
        if i == restart_at {
            // 进程重启：文件已存在，初始化不改动内容
            let before = fs::read(log.path()).unwrap();
            log = open_log(&base);
            assert_eq!(fs::read(log.path()).unwrap(), before);
        }

        log.append(&sample(i)).unwrap();

        let size = fs::metadata(log.path()).unwrap().len();
        assert!(size <= CAPACITY, "size {} exceeds capacity at sample {}", size, i);
    }

    let data = fs::read_to_string(log.path()).unwrap();
    assert!(data.starts_with(HEADER));
    assert_eq!(data.matches("timestamp").count(), 1);

    // 保留的记录是最新的一段连续采样
    let records: Vec<Record> = log.records().unwrap().map(|r| r.unwrap()).collect();
    assert!(!records.is_empty());
    let first = records[0].timestamp - START_TS;
    for (offset, record) in records.iter().enumerate() {
        assert_eq!(*record, sample(first + offset as u64).rounded());
    }
    assert_eq!(records.last().unwrap().timestamp, START_TS + total - 1);

    // 轮转后空间利用率不应太低
    let stats = log.stats().unwrap();
    println!("{}", stats);
    assert_eq!(stats.record_count, records.len() as u64);
    assert!(stats.size_bytes + 99 > CAPACITY);
}

#[test]
fn test_restart_after_partial_rotation() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("littlefs");
    fs::create_dir_all(&base).unwrap();

    // 模拟轮转中断电：截断已完成但新记录未写入，文件仍是表头 + 连续旧记录
    let path = base.join("datalog.csv");
    let mut content = HEADER.to_string();
    for i in 10..20 {
        content.push_str(&sample(i).to_line().unwrap());
    }
    fs::write(&path, &content).unwrap();

    let mut log = open_log(&base);
    log.append(&sample(20)).unwrap();

    let timestamps: Vec<u64> = log
        .records()
        .unwrap()
        .map(|r| r.unwrap().timestamp - START_TS)
        .collect();
    assert_eq!(timestamps, (10..=20).collect::<Vec<_>>());
}
