//! 有界 CSV 日志
//!
//! 设计要点：
//! 1. 表头常驻 - 第一行写入后永不淘汰
//! 2. 容量上限 - 追加后文件大小不超过 capacity
//! 3. 原地轮转 - 空间不足时按整行淘汰最旧记录，同一文件内前移，无需第二个文件
//! 4. 无缓存 - 每次调用都从存储重新读取大小和表头
//!
//! 轮转过程：
//! ```text
//! ┌────────┬──────────────────────┬───────────────────────────┐
//! │ Header │ Rec1 │ Rec2 │ ...     │ RecK │ ... │ RecN         │
//! └────────┴──────────────────────┴───────────────────────────┘
//!          ↑ write_pos             ↑ read_pos (skipped >= excess)
//!
//! ┌────────┬───────────────────────────┬──────┐
//! │ Header │ RecK │ ... │ RecN          │ New  │
//! └────────┴───────────────────────────┴──────┘
//! ```
//! 搬移完成后才截断，截断后再追加新记录。

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::constants::{COPY_BUF_SIZE, LINE_BUF_SIZE, MAX_RECORD_LEN};
use crate::error::{LogError, Result};
use crate::record::Record;
use crate::storage::{DirStorage, LogFile, OpenMode, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogState {
    Uninitialized,
    Ready,
    /// 初始化失败，追加直接返回错误
    Inert,
}

/// 统计信息
#[derive(Debug, Clone, Default)]
pub struct LogStats {
    pub capacity: u64,
    pub size_bytes: u64,
    pub header_len: u64,
    pub record_count: u64,
    pub malformed_count: u64,
    pub first_timestamp: Option<u64>,
    pub last_timestamp: Option<u64>,
}

impl fmt::Display for LogStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Data Log Statistics:")?;
        writeln!(
            f,
            "  Capacity: {} bytes ({:.1} KB)",
            self.capacity,
            self.capacity as f64 / 1024.0
        )?;
        writeln!(
            f,
            "  Used: {} bytes ({:.1}%)",
            self.size_bytes,
            self.size_bytes as f64 / self.capacity as f64 * 100.0
        )?;
        writeln!(f, "  Header: {} bytes", self.header_len)?;
        writeln!(f, "  Records: {}", self.record_count)?;
        if self.malformed_count > 0 {
            writeln!(f, "  Malformed lines: {}", self.malformed_count)?;
        }
        match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => writeln!(f, "  Time range: {} .. {}", first, last)?,
            _ => writeln!(f, "  Time range: -")?,
        }
        Ok(())
    }
}

/// 有界日志
pub struct BoundedLog<S: Storage = DirStorage> {
    storage: S,
    path: PathBuf,
    header: String,
    capacity: u64,
    state: LogState,
}

impl<S: Storage> BoundedLog<S> {
    /// 创建日志对象，不访问存储
    ///
    /// 表头不带换行符时自动补齐；表头必须是非空单行，且容量要能容纳表头加一行数据。
    pub fn new<P: AsRef<Path>>(
        storage: S,
        file_name: P,
        header: &str,
        capacity: u64,
    ) -> Result<Self> {
        let trimmed = header.strip_suffix('\n').unwrap_or(header);
        if trimmed.is_empty() {
            return Err(LogError::Config("header must not be empty".to_string()));
        }
        if trimmed.contains(|c: char| c == '\n' || c == '\r') {
            return Err(LogError::Config(format!(
                "header must be a single line: {:?}",
                header
            )));
        }
        let header = format!("{}\n", trimmed);
        if header.len() > LINE_BUF_SIZE {
            return Err(LogError::Config(format!(
                "header too long: {} bytes (max {})",
                header.len(),
                LINE_BUF_SIZE
            )));
        }
        if capacity <= header.len() as u64 {
            return Err(LogError::Config(format!(
                "capacity {} too small for {} byte header",
                capacity,
                header.len()
            )));
        }

        let path = storage.resolve(file_name.as_ref());
        Ok(Self {
            storage,
            path,
            header,
            capacity,
            state: LogState::Uninitialized,
        })
    }

    /// 日志文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_ready(&self) -> bool {
        self.state == LogState::Ready
    }

    pub fn is_inert(&self) -> bool {
        self.state == LogState::Inert
    }

    /// 挂载存储并确保日志文件存在
    ///
    /// 文件已存在时保持原样；失败时日志进入 inert 状态，之后的追加直接返回错误。
    pub fn initialize(&mut self) -> Result<()> {
        info!("Initializing datalog at {}", self.path.display());

        match self.try_initialize() {
            Ok(()) => {
                self.state = LogState::Ready;
                Ok(())
            }
            Err(e) => {
                match &e {
                    LogError::MountFailure(_) => {
                        error!("Failed to mount or format filesystem: {}", e)
                    }
                    LogError::PartitionNotFound(_) => {
                        error!("Failed to find storage partition: {}", e)
                    }
                    _ => error!("Failed to initialize datalog: {}", e),
                }
                self.state = LogState::Inert;
                Err(e)
            }
        }
    }

    fn try_initialize(&self) -> Result<()> {
        let info = self.storage.mount()?;
        match info.total_bytes {
            Some(total) => info!(
                "Partition size: total: {}, used: {}",
                total, info.used_bytes
            ),
            None => info!("Partition used: {} bytes", info.used_bytes),
        }

        match self.storage.stat(&self.path) {
            Ok(_) => {
                info!("Log file found.");
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(LogError::io("stat")(e)),
        }

        info!("Log file not found, creating new one.");
        let mut file = self
            .storage
            .open(&self.path, OpenMode::Create)
            .map_err(LogError::io("create"))?;
        file.write_all(self.header.as_bytes())
            .map_err(LogError::io("write"))?;
        file.sync().map_err(LogError::io("sync"))?;
        Ok(())
    }

    /// 追加一条记录
    pub fn append(&mut self, record: &Record) -> Result<()> {
        let result = record.to_line().and_then(|line| self.append_raw(&line));
        self.report(result)
    }

    /// 追加一行已格式化的记录（末尾换行符可省略）
    pub fn append_line(&mut self, line: &str) -> Result<()> {
        let result = normalize_line(line).and_then(|line| self.append_raw(&line));
        self.report(result)
    }

    fn report(&self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            error!("Failed to append to {}: {}", self.path.display(), e);
        }
        result
    }

    fn append_raw(&self, line: &str) -> Result<()> {
        match self.state {
            LogState::Ready => {}
            LogState::Inert => return Err(LogError::Inert),
            LogState::Uninitialized => return Err(LogError::NotInitialized),
        }

        let size = match self.storage.stat(&self.path) {
            Ok(size) => size,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LogError::NotFound(self.path.clone()))
            }
            Err(e) => return Err(LogError::io("stat")(e)),
        };
        let line_len = line.len() as u64;

        if size + line_len <= self.capacity {
            let mut file = self
                .storage
                .open(&self.path, OpenMode::Append)
                .map_err(LogError::io("open"))?;
            file.write_all(line.as_bytes())
                .map_err(LogError::io("write"))?;
            file.sync().map_err(LogError::io("sync"))?;
            return Ok(());
        }

        let excess = size + line_len - self.capacity;
        debug!(
            "Log file is full ({} + {} > {}), rotating {} bytes",
            size, line_len, self.capacity, excess
        );
        let new_size = self.rotate(excess, line)?;
        debug!("Log file rotated successfully, size {}", new_size);
        Ok(())
    }

    /// 淘汰至少 excess 字节的最旧记录，然后追加新行；返回轮转后的文件大小
    fn rotate(&self, excess: u64, line: &str) -> Result<u64> {
        let mut file = self
            .storage
            .open(&self.path, OpenMode::ReadWrite)
            .map_err(LogError::io("open"))?;

        let (header_len, read_pos) = find_keep_offset(&mut file, excess)?;
        let write_pos = compact(&mut file, read_pos, header_len)?;

        // 必须在搬移结束后截断
        file.set_len(write_pos).map_err(LogError::io("truncate"))?;
        file.seek(SeekFrom::End(0)).map_err(LogError::io("seek"))?;
        file.write_all(line.as_bytes())
            .map_err(LogError::io("write"))?;
        file.sync().map_err(LogError::io("sync"))?;

        Ok(write_pos + line.len() as u64)
    }

    /// 读取存储中的表头行
    pub fn read_header(&self) -> Result<String> {
        let mut reader = self.open_reader()?;
        read_header_line(&mut reader)
    }

    /// 遍历表头之后的所有记录
    pub fn records(&self) -> Result<Records<S::File>> {
        let mut reader = self.open_reader()?;
        read_header_line(&mut reader)?;
        Ok(Records {
            reader,
            line: Vec::with_capacity(LINE_BUF_SIZE),
            line_no: 1,
        })
    }

    /// 统计信息
    pub fn stats(&self) -> Result<LogStats> {
        let size_bytes = self.stat_existing()?;
        let header_len = self.read_header()?.len() as u64;

        let mut stats = LogStats {
            capacity: self.capacity,
            size_bytes,
            header_len,
            ..Default::default()
        };

        for record in self.records()? {
            match record {
                Ok(record) => {
                    stats.record_count += 1;
                    stats.first_timestamp.get_or_insert(record.timestamp);
                    stats.last_timestamp = Some(record.timestamp);
                }
                Err(LogError::Format(msg)) => {
                    debug!("stats: {}", msg);
                    stats.malformed_count += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(stats)
    }

    fn stat_existing(&self) -> Result<u64> {
        self.storage.stat(&self.path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LogError::NotFound(self.path.clone())
            } else {
                LogError::io("stat")(e)
            }
        })
    }

    fn open_reader(&self) -> Result<BufReader<S::File>> {
        let file = self
            .storage
            .open(&self.path, OpenMode::Read)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    LogError::NotFound(self.path.clone())
                } else {
                    LogError::io("open")(e)
                }
            })?;
        Ok(BufReader::with_capacity(LINE_BUF_SIZE, file))
    }
}

/// 记录迭代器
///
/// 每次最多读取 LINE_BUF_SIZE 字节，超长行和非 UTF-8 行作为格式错误返回，迭代继续。
pub struct Records<F> {
    reader: BufReader<F>,
    line: Vec<u8>,
    line_no: usize,
}

impl<F: Read> Records<F> {
    fn read_record(&mut self) -> Option<Result<Vec<u8>>> {
        self.line.clear();
        let n = match (&mut self.reader)
            .take(LINE_BUF_SIZE as u64)
            .read_until(b'\n', &mut self.line)
        {
            Ok(n) => n,
            Err(e) => return Some(Err(LogError::io("read")(e))),
        };
        if n == 0 {
            return None;
        }
        self.line_no += 1;

        if n == LINE_BUF_SIZE && self.line.last() != Some(&b'\n') {
            let rest = match skip_line(&mut self.reader) {
                Ok((rest, _)) => rest,
                Err(e) => return Some(Err(LogError::io("read")(e))),
            };
            return Some(Err(LogError::Format(format!(
                "line {}: line too long ({} bytes)",
                self.line_no,
                n as u64 + rest
            ))));
        }
        Some(Ok(std::mem::take(&mut self.line)))
    }
}

impl<F: Read> Iterator for Records<F> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let bytes = match self.read_record()? {
                Ok(bytes) => bytes,
                Err(e) => return Some(Err(e)),
            };
            let line_no = self.line_no;
            let result = match std::str::from_utf8(&bytes) {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(line.parse::<Record>().map_err(|e| match e {
                    LogError::Format(msg) => LogError::Format(format!("line {}: {}", line_no, msg)),
                    other => other,
                })),
                Err(e) => Some(Err(LogError::Format(format!(
                    "line {}: invalid UTF-8: {}",
                    line_no, e
                )))),
            };
            // 复用缓冲区
            self.line = bytes;
            if let Some(result) = result {
                return Some(result);
            }
        }
    }
}

/// 规范化单行输入：补齐换行符并检查长度
fn normalize_line(line: &str) -> Result<String> {
    let body = line.strip_suffix('\n').unwrap_or(line);
    if body.is_empty() {
        return Err(LogError::Format("empty record line".to_string()));
    }
    if body.contains('\n') {
        return Err(LogError::Format("record must be a single line".to_string()));
    }
    let line = format!("{}\n", body);
    if line.len() > MAX_RECORD_LEN {
        return Err(LogError::Format(format!(
            "record line too long: {} bytes (max {})",
            line.len(),
            MAX_RECORD_LEN
        )));
    }
    Ok(line)
}

fn read_header_line<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut header = String::new();
    // 表头同样受行长度约束，避免损坏文件导致整文件读入内存
    let n = reader
        .take(LINE_BUF_SIZE as u64)
        .read_line(&mut header)
        .map_err(LogError::io("read"))?;
    if n == 0 || !header.ends_with('\n') {
        return Err(LogError::CorruptLog("could not read header".to_string()));
    }
    Ok(header)
}

/// 跳过一行，返回 (字节数, 是否以换行结束)；文件末尾返回 (0, false)
fn skip_line<R: BufRead>(reader: &mut R) -> io::Result<(u64, bool)> {
    let mut total = 0u64;
    loop {
        let (used, done) = {
            let available = match reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok((total, false));
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        total += used as u64;
        if done {
            return Ok((total, true));
        }
    }
}

/// 读取表头长度，并从表头之后按行累计，找到第一条需要保留的记录位置
///
/// 返回 (header_len, read_pos)。淘汰总是落在整行边界上，可能略多于 excess。
fn find_keep_offset<F: LogFile>(file: &mut F, excess: u64) -> Result<(u64, u64)> {
    file.seek(SeekFrom::Start(0)).map_err(LogError::io("seek"))?;
    let mut reader = BufReader::with_capacity(LINE_BUF_SIZE, file);

    let (header_len, terminated) = skip_line(&mut reader).map_err(LogError::io("read"))?;
    if header_len == 0 || !terminated {
        return Err(LogError::CorruptLog("could not read header".to_string()));
    }

    let mut skipped = 0u64;
    let mut evicted = 0usize;
    while skipped < excess {
        let (n, _) = skip_line(&mut reader).map_err(LogError::io("read"))?;
        if n == 0 {
            // 淘汰全部记录仍不够
            break;
        }
        skipped += n;
        evicted += 1;
    }
    debug!(
        "Evicting {} records ({} bytes, excess {})",
        evicted, skipped, excess
    );

    Ok((header_len, header_len + skipped))
}

/// 双游标前移：把 read_pos 到文件末尾的内容搬到 write_pos，返回新的 write_pos
fn compact<F: LogFile>(file: &mut F, mut read_pos: u64, mut write_pos: u64) -> Result<u64> {
    let mut buffer = [0u8; COPY_BUF_SIZE];

    loop {
        debug_assert!(read_pos >= write_pos);

        file.seek(SeekFrom::Start(read_pos))
            .map_err(LogError::io("seek"))?;
        let bytes_read = match file.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(LogError::io("read")(e)),
        };
        if bytes_read == 0 {
            break;
        }
        read_pos += bytes_read as u64;

        file.seek(SeekFrom::Start(write_pos))
            .map_err(LogError::io("seek"))?;
        file.write_all(&buffer[..bytes_read])
            .map_err(LogError::io("write"))?;
        write_pos += bytes_read as u64;
    }

    Ok(write_pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_HEADER;
    use crate::storage::MemStorage;

    #[test]
    fn test_records_line_buffer_is_bounded() {
        let storage = MemStorage::new();
        let mut log = BoundedLog::new(storage.clone(), "datalog.csv", DEFAULT_HEADER, 1024).unwrap();
        log.initialize().unwrap();

        // 4 MiB 没有换行的尾部
        let mut data = DEFAULT_HEADER.as_bytes().to_vec();
        data.resize(data.len() + 4 * 1024 * 1024, b'7');
        storage.put(log.path(), &data);

        let mut records = log.records().unwrap();
        assert!(matches!(records.next(), Some(Err(LogError::Format(_)))));
        assert!(
            records.line.capacity() <= 2 * LINE_BUF_SIZE,
            "line buffer grew to {}",
            records.line.capacity()
        );
        assert!(records.next().is_none());
    }
}
