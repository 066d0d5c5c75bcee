//! datalog 命令行工具
//!
//! 用法：
//!   datalog                                         # 显示统计（/littlefs/datalog.csv）
//!   datalog init                                    # 挂载存储并创建日志文件
//!   datalog append <ts> <voltage> <current> <power> # 追加一条记录
//!   datalog record [--cmd <command>]                # 从 stdin 或命令输出逐行记录采样
//!   datalog dump                                    # 输出表头和全部记录
//!   datalog stats                                   # 显示统计

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datalog::{BoundedLog, DataLogConfig, DirStorage, Record, Storage};
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "datalog")]
#[command(about = "Bounded-size CSV telemetry log", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 存储挂载目录
    #[arg(short, long)]
    base_path: Option<PathBuf>,

    /// 日志文件名
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// 最大存储大小（字节）
    #[arg(short, long)]
    max_size: Option<u64>,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 挂载存储并创建日志文件
    Init,

    /// 追加一条记录
    Append {
        timestamp: u64,
        voltage: f64,
        current: f64,
        power: f64,
    },

    /// 逐行记录采样（voltage,current,power 或 timestamp,voltage,current,power）
    Record {
        /// 采样命令（默认读取 stdin）
        #[arg(long)]
        cmd: Option<String>,
    },

    /// 输出表头和全部记录
    Dump,

    /// 显示统计信息
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 设置日志
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&cli)?;
    let mut log = config.build()?;

    match cli.command {
        Some(Commands::Init) => {
            log.initialize()?;
            info!("datalog: Ready at {}", log.path().display());
        }
        Some(Commands::Append {
            timestamp,
            voltage,
            current,
            power,
        }) => {
            log.initialize()?;
            log.append(&Record::new(timestamp, voltage, current, power))?;
        }
        Some(Commands::Record { cmd }) => cmd_record(&mut log, cmd.as_deref())?,
        Some(Commands::Dump) => cmd_dump(&log)?,
        None | Some(Commands::Stats) => {
            let stats = log
                .stats()
                .with_context(|| format!("read {}", log.path().display()))?;
            print!("{}", stats);
        }
    }

    Ok(())
}

/// 加载配置文件，命令行参数优先
fn load_config(cli: &Cli) -> Result<DataLogConfig> {
    let mut config = match &cli.config {
        Some(path) => DataLogConfig::from_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => DataLogConfig::default(),
    };

    if let Some(base_path) = &cli.base_path {
        config.base_path = base_path.clone();
    }
    if let Some(file) = &cli.file {
        config.file_name = file.clone();
    }
    if let Some(max_size) = cli.max_size {
        config.capacity = max_size;
    }
    Ok(config)
}

/// 解析一行采样：3 个字段时使用当前时间戳
fn parse_sample(line: &str) -> Option<Record> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    match fields.as_slice() {
        [v, i, p] => Some(Record::now(v.parse().ok()?, i.parse().ok()?, p.parse().ok()?)),
        [_, _, _, _] => line.trim().parse().ok(),
        _ => None,
    }
}

/// 记录采样
fn cmd_record(log: &mut BoundedLog<DirStorage>, cmd: Option<&str>) -> Result<()> {
    log.initialize()?;

    let mut child = None;
    let input: Box<dyn BufRead> = match cmd {
        Some(cmd) => {
            info!("datalog: Recording from '{}' to {}", cmd, log.path().display());
            let mut c = Command::new("sh")
                .arg("-c")
                .arg(cmd)
                .stdout(Stdio::piped())
                .spawn()
                .with_context(|| format!("spawn '{}'", cmd))?;
            let stdout = c.stdout.take().context("child stdout unavailable")?;
            child = Some(c);
            Box::new(BufReader::new(stdout))
        }
        None => {
            info!("datalog: Recording from stdin to {}", log.path().display());
            Box::new(io::stdin().lock())
        }
    };
    info!("datalog: Capacity {} bytes", log.capacity());

    let result = record_lines(log, input);

    // 读取出错时也要回收子进程
    if let Some(mut child) = child {
        match child.wait() {
            Ok(status) if !status.success() => {
                warn!("datalog: Sampling command exited with {}", status)
            }
            Ok(_) => {}
            Err(e) => warn!("datalog: Failed to wait for sampling command: {}", e),
        }
    }

    let (recorded, dropped) = result?;
    info!(
        "datalog: Done. {} samples recorded, {} dropped",
        recorded, dropped
    );
    Ok(())
}

/// 逐行追加采样，返回 (已记录, 已丢弃)
fn record_lines<S: Storage, R: BufRead>(
    log: &mut BoundedLog<S>,
    input: R,
) -> Result<(u64, u64)> {
    let mut recorded = 0u64;
    let mut dropped = 0u64;
    for line in input.lines() {
        let line = line.context("read sample")?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(record) = parse_sample(&line) else {
            warn!("datalog: Skipping malformed sample: {:?}", line);
            dropped += 1;
            continue;
        };
        // 单条失败不终止记录，下一条从磁盘状态重新开始
        match log.append(&record) {
            Ok(()) => recorded += 1,
            Err(_) => dropped += 1,
        }
    }
    Ok((recorded, dropped))
}

/// 输出日志内容
fn cmd_dump(log: &BoundedLog<DirStorage>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let header = log
        .read_header()
        .with_context(|| format!("read {}", log.path().display()))?;
    out.write_all(header.as_bytes())?;

    let mut errors = 0u64;
    for record in log.records()? {
        match record {
            Ok(record) => writeln!(out, "{}", record)?,
            Err(e) => {
                warn!("datalog: {}", e);
                errors += 1;
            }
        }
    }
    out.flush()?;

    if errors > 0 {
        warn!("datalog: Skipped {} malformed lines", errors);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample() {
        let record = parse_sample("5.0, 0.25, 1.25").unwrap();
        assert_eq!(
            (record.voltage, record.current, record.power),
            (5.0, 0.25, 1.25)
        );
        assert!(record.timestamp > 0);

        let record = parse_sample("42,1.000,2.000,3.000").unwrap();
        assert_eq!(record, Record::new(42, 1.0, 2.0, 3.0));

        assert!(parse_sample("5.0,abc,1.0").is_none());
        assert!(parse_sample("1,2").is_none());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from(["datalog", "--max-size", "4096", "--file", "p.csv", "stats"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.capacity, 4096);
        assert_eq!(config.file_name, PathBuf::from("p.csv"));
    }

    #[test]
    fn test_record_lines_skips_bad_samples() {
        let storage = datalog::MemStorage::new();
        let mut log = DataLogConfig::default().build_with(storage).unwrap();
        log.initialize().unwrap();

        let input = io::Cursor::new("5.0,0.25,1.25\nbad\n\n42,1,2,3\n");
        let (recorded, dropped) = record_lines(&mut log, input).unwrap();
        assert_eq!((recorded, dropped), (2, 1));
        assert_eq!(log.stats().unwrap().record_count, 2);
    }

    #[test]
    fn test_record_from_failing_command() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = DataLogConfig {
            base_path: tmp.path().to_path_buf(),
            ..Default::default()
        };
        let mut log = config.build().unwrap();

        // 非零退出只告警，已输出的采样照常记录
        cmd_record(&mut log, Some("echo 7,1.0,2.0,3.0; exit 3")).unwrap();
        let records: Vec<Record> = log.records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records, vec![Record::new(7, 1.0, 2.0, 3.0)]);
    }
}
