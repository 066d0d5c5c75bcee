//! 存储抽象
//!
//! 日志只依赖 open/read/write/seek/truncate/stat 语义，底层可以是：
//! - `DirStorage`: 主机文件系统上的一个目录（对应 Flash 分区挂载点）
//! - `MemStorage`: 内存存储，用于测试隔离
//!
//! 打开模式与 C 标准库一致：
//! ```text
//!   Read      = "r"   只读，文件必须存在
//!   Create    = "w"   创建/清空后写入
//!   Append    = "a"   追加写入，不存在则创建
//!   ReadWrite = "r+"  读写，文件必须存在
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{LogError, Result};

/// 可截断的文件句柄
pub trait LogFile: Read + Write + Seek {
    /// 截断或扩展到指定长度
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// 刷新到存储介质
    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// 打开模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Create,
    Append,
    ReadWrite,
}

/// 分区信息
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageInfo {
    /// 分区总大小（未知时为 None）
    pub total_bytes: Option<u64>,
    /// 已使用大小
    pub used_bytes: u64,
}

/// 文件系统协作方
pub trait Storage {
    type File: LogFile;

    /// 挂载存储，返回分区信息
    fn mount(&self) -> Result<StorageInfo>;

    /// 将文件名解析为完整路径
    fn resolve(&self, name: &Path) -> PathBuf;

    /// 获取文件大小
    fn stat(&self, path: &Path) -> io::Result<u64>;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Self::File>;
}

// ============================================================================
// DirStorage
// ============================================================================

/// 基于目录的存储
#[derive(Debug, Clone)]
pub struct DirStorage {
    base_path: PathBuf,
    format_if_mount_failed: bool,
}

impl DirStorage {
    pub fn new<P: AsRef<Path>>(base_path: P, format_if_mount_failed: bool) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            format_if_mount_failed,
        }
    }

    /// 统计目录下普通文件的总大小
    fn used_bytes(&self) -> io::Result<u64> {
        let mut used = 0;
        for entry in fs::read_dir(&self.base_path)? {
            let meta = entry?.metadata()?;
            if meta.is_file() {
                used += meta.len();
            }
        }
        Ok(used)
    }
}

impl Storage for DirStorage {
    type File = File;

    fn mount(&self) -> Result<StorageInfo> {
        let base = &self.base_path;

        match fs::metadata(base) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(LogError::MountFailure(format!(
                    "{} is not a directory",
                    base.display()
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // 挂载点所在分区不存在
                let parent_missing = base
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .is_some_and(|p| !p.is_dir());
                if parent_missing {
                    return Err(LogError::PartitionNotFound(base.clone()));
                }
                if !self.format_if_mount_failed {
                    return Err(LogError::MountFailure(format!(
                        "{} does not exist",
                        base.display()
                    )));
                }
                info!("Formatting storage at {}", base.display());
                fs::create_dir(base).map_err(|e| LogError::MountFailure(e.to_string()))?;
            }
            Err(e) => return Err(LogError::MountFailure(e.to_string())),
        }

        let used_bytes = self.used_bytes().map_err(LogError::io("stat"))?;
        Ok(StorageInfo {
            total_bytes: None,
            used_bytes,
        })
    }

    fn resolve(&self, name: &Path) -> PathBuf {
        self.base_path.join(name)
    }

    fn stat(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<File> {
        let mut opts = OpenOptions::new();
        match mode {
            OpenMode::Read => opts.read(true),
            OpenMode::Create => opts.write(true).create(true).truncate(true),
            OpenMode::Append => opts.append(true).create(true),
            OpenMode::ReadWrite => opts.read(true).write(true),
        };
        opts.open(path)
    }
}

// ============================================================================
// MemStorage
// ============================================================================

/// 注入的挂载故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountFault {
    /// 挂载/格式化失败
    Failed,
    /// 找不到分区
    PartitionMissing,
}

/// 注入的写入故障，模拟写入过程中掉电或介质错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// 再成功写入 n 字节后，所有写入失败
    AfterBytes(u64),
    /// 截断失败
    Truncate,
}

#[derive(Debug, Default)]
struct MemInner {
    files: HashMap<PathBuf, Arc<Mutex<Vec<u8>>>>,
    partition_size: Option<u64>,
    mount_fault: Option<MountFault>,
}

/// 内存存储，克隆后共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    inner: Arc<Mutex<MemInner>>,
    write_fault: Arc<Mutex<Option<WriteFault>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定分区大小（仅用于挂载信息）
    pub fn with_partition_size(size: u64) -> Self {
        let storage = Self::default();
        storage.inner.lock().partition_size = Some(size);
        storage
    }

    pub fn set_mount_fault(&self, fault: Option<MountFault>) {
        self.inner.lock().mount_fault = fault;
    }

    /// 对所有已打开和之后打开的文件生效
    pub fn set_write_fault(&self, fault: Option<WriteFault>) {
        *self.write_fault.lock() = fault;
    }

    /// 读取文件全部内容
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        let inner = self.inner.lock();
        inner.files.get(path).map(|data| data.lock().clone())
    }

    /// 直接写入文件内容（测试构造损坏文件用）
    pub fn put(&self, path: &Path, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner
            .files
            .insert(path.to_path_buf(), Arc::new(Mutex::new(data.to_vec())));
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.inner.lock().files.remove(path).is_some()
    }
}

impl Storage for MemStorage {
    type File = MemFile;

    fn mount(&self) -> Result<StorageInfo> {
        let inner = self.inner.lock();
        match inner.mount_fault {
            Some(MountFault::Failed) => {
                return Err(LogError::MountFailure("injected mount fault".to_string()))
            }
            Some(MountFault::PartitionMissing) => {
                return Err(LogError::PartitionNotFound(PathBuf::from("/")))
            }
            None => {}
        }

        let used_bytes: u64 = inner.files.values().map(|f| f.lock().len() as u64).sum();
        Ok(StorageInfo {
            total_bytes: inner.partition_size,
            used_bytes,
        })
    }

    fn resolve(&self, name: &Path) -> PathBuf {
        Path::new("/").join(name)
    }

    fn stat(&self, path: &Path) -> io::Result<u64> {
        let inner = self.inner.lock();
        inner
            .files
            .get(path)
            .map(|data| data.lock().len() as u64)
            .ok_or_else(|| not_found(path))
    }

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<MemFile> {
        let mut inner = self.inner.lock();
        let data = match mode {
            OpenMode::Read | OpenMode::ReadWrite => inner
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| not_found(path))?,
            OpenMode::Create => {
                let data = Arc::new(Mutex::new(Vec::new()));
                inner.files.insert(path.to_path_buf(), data.clone());
                data
            }
            OpenMode::Append => inner
                .files
                .entry(path.to_path_buf())
                .or_default()
                .clone(),
        };
        debug!("mem open {} ({:?})", path.display(), mode);

        Ok(MemFile {
            data,
            pos: 0,
            mode,
            write_fault: self.write_fault.clone(),
        })
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    )
}

/// 内存文件句柄
#[derive(Debug)]
pub struct MemFile {
    data: Arc<Mutex<Vec<u8>>>,
    pos: u64,
    mode: OpenMode,
    write_fault: Arc<Mutex<Option<WriteFault>>>,
}

impl MemFile {
    /// 按注入的故障计算本次允许写入的字节数
    fn write_allowance(&self, len: usize) -> io::Result<usize> {
        let mut fault = self.write_fault.lock();
        match fault.as_mut() {
            Some(WriteFault::AfterBytes(0)) => Err(injected("write")),
            Some(WriteFault::AfterBytes(remaining)) => {
                let n = len.min(*remaining as usize);
                *remaining -= n as u64;
                Ok(n)
            }
            _ => Ok(len),
        }
    }
}

fn injected(op: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("injected {} fault", op))
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.mode == OpenMode::Create || self.mode == OpenMode::Append {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for reading",
            ));
        }
        let data = self.data.lock();
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.mode == OpenMode::Read {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for writing",
            ));
        }
        // 超出额度时只写入一部分，模拟写到一半掉电
        let buf = &buf[..self.write_allowance(buf.len())?];
        let mut data = self.data.lock();
        if self.mode == OpenMode::Append {
            self.pos = data.len() as u64;
        }
        let start = self.pos as usize;
        if start > data.len() {
            data.resize(start, 0);
        }
        let overlap = buf.len().min(data.len() - start);
        data[start..start + overlap].copy_from_slice(&buf[..overlap]);
        data.extend_from_slice(&buf[overlap..]);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data.lock().len() as i64;
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(off) => len + off,
            SeekFrom::Current(off) => self.pos as i64 + off,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

impl LogFile for MemFile {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        if self.mode == OpenMode::Read {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened for writing",
            ));
        }
        if *self.write_fault.lock() == Some(WriteFault::Truncate) {
            return Err(injected("truncate"));
        }
        self.data.lock().resize(len as usize, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_open_modes() {
        let storage = MemStorage::new();
        let path = storage.resolve(Path::new("a.csv"));

        assert!(storage.open(&path, OpenMode::Read).is_err());
        assert!(storage.open(&path, OpenMode::ReadWrite).is_err());

        let mut f = storage.open(&path, OpenMode::Create).unwrap();
        f.write_all(b"hello\n").unwrap();
        drop(f);

        let mut f = storage.open(&path, OpenMode::Append).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f.write_all(b"world\n").unwrap();
        drop(f);
        assert_eq!(storage.contents(&path).unwrap(), b"hello\nworld\n");
        assert_eq!(storage.stat(&path).unwrap(), 12);

        let mut f = storage.open(&path, OpenMode::ReadWrite).unwrap();
        f.seek(SeekFrom::Start(2)).unwrap();
        f.write_all(b"LL").unwrap();
        f.set_len(6).unwrap();
        drop(f);
        assert_eq!(storage.contents(&path).unwrap(), b"heLLo\n");
    }

    #[test]
    fn test_mem_read_short_at_eof() {
        let storage = MemStorage::new();
        let path = storage.resolve(Path::new("b.csv"));
        storage.put(&path, b"abc");

        let mut f = storage.open(&path, OpenMode::Read).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf).unwrap(), 3);
        assert_eq!(f.read(&mut buf).unwrap(), 0);
        assert!(f.write(b"x").is_err());
    }

    #[test]
    fn test_mem_mount_fault() {
        let storage = MemStorage::with_partition_size(4096);
        let info = storage.mount().unwrap();
        assert_eq!(info.total_bytes, Some(4096));

        storage.set_mount_fault(Some(MountFault::Failed));
        assert!(matches!(storage.mount(), Err(LogError::MountFailure(_))));
        storage.set_mount_fault(Some(MountFault::PartitionMissing));
        assert!(matches!(
            storage.mount(),
            Err(LogError::PartitionNotFound(_))
        ));
    }

    #[test]
    fn test_mem_write_fault() {
        let storage = MemStorage::new();
        let path = storage.resolve(Path::new("f"));
        let mut f = storage.open(&path, OpenMode::Create).unwrap();

        storage.set_write_fault(Some(WriteFault::AfterBytes(4)));
        assert!(f.write_all(b"abcdefgh").is_err());
        assert_eq!(storage.contents(&path).unwrap(), b"abcd");

        storage.set_write_fault(Some(WriteFault::Truncate));
        assert!(f.set_len(0).is_err());
        f.write_all(b"ef").unwrap();
        assert_eq!(storage.contents(&path).unwrap(), b"abcdef");

        storage.set_write_fault(None);
        f.set_len(2).unwrap();
        assert_eq!(storage.contents(&path).unwrap(), b"ab");
    }

    #[test]
    fn test_dir_mount() {
        let tmp = tempfile::TempDir::new().unwrap();

        // 目录存在
        let storage = DirStorage::new(tmp.path(), false);
        storage.mount().unwrap();

        // 目录不存在但允许格式化
        let sub = tmp.path().join("littlefs");
        let storage = DirStorage::new(&sub, true);
        storage.mount().unwrap();
        assert!(sub.is_dir());

        // 目录不存在且不允许格式化
        let storage = DirStorage::new(tmp.path().join("other"), false);
        assert!(matches!(storage.mount(), Err(LogError::MountFailure(_))));

        // 上级分区不存在
        let storage = DirStorage::new(tmp.path().join("missing/littlefs"), true);
        assert!(matches!(
            storage.mount(),
            Err(LogError::PartitionNotFound(_))
        ));

        // 挂载点是普通文件
        let file = tmp.path().join("plain");
        fs::write(&file, b"x").unwrap();
        let storage = DirStorage::new(&file, true);
        assert!(matches!(storage.mount(), Err(LogError::MountFailure(_))));
    }

    #[test]
    fn test_dir_used_bytes() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), b"1234").unwrap();
        fs::write(tmp.path().join("b"), b"56").unwrap();

        let info = DirStorage::new(tmp.path(), false).mount().unwrap();
        assert_eq!(info.used_bytes, 6);
        assert_eq!(info.total_bytes, None);
    }
}
