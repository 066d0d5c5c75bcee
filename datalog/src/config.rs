//! 日志配置
//!
//! 支持从 JSON 配置文件读取，缺省字段使用默认值：
//! ```json
//! {
//!   "base_path": "/littlefs",
//!   "format_if_mount_failed": true,
//!   "file_name": "datalog.csv",
//!   "header": "timestamp,voltage,current,power",
//!   "capacity": 1048576
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bounded_log::BoundedLog;
use crate::constants::{DEFAULT_BASE_PATH, DEFAULT_CAPACITY, DEFAULT_FILE_NAME, DEFAULT_HEADER};
use crate::error::{LogError, Result};
use crate::storage::{DirStorage, Storage};

/// 数据日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLogConfig {
    /// 存储挂载目录
    pub base_path: PathBuf,
    /// 挂载点不存在时是否创建
    pub format_if_mount_failed: bool,
    /// 日志文件名（相对于 base_path）
    pub file_name: PathBuf,
    /// 表头行
    pub header: String,
    /// 文件大小上限（字节）
    pub capacity: u64,
}

impl Default for DataLogConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(DEFAULT_BASE_PATH),
            format_if_mount_failed: true,
            file_name: PathBuf::from(DEFAULT_FILE_NAME),
            header: DEFAULT_HEADER.trim_end().to_string(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl DataLogConfig {
    /// 从 JSON 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| LogError::Config(format!("read {}: {}", path.display(), e)))?;
        let config: DataLogConfig = serde_json::from_str(&content)
            .map_err(|e| LogError::Config(format!("parse {}: {}", path.display(), e)))?;

        if config.file_name.as_os_str().is_empty() {
            return Err(LogError::Config("file_name must not be empty".to_string()));
        }
        Ok(config)
    }

    /// 保存配置到 JSON 文件
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| LogError::Config(e.to_string()))?;
        fs::write(path, content).map_err(LogError::io("write"))
    }

    /// 目录存储
    pub fn storage(&self) -> DirStorage {
        DirStorage::new(&self.base_path, self.format_if_mount_failed)
    }

    /// 在指定存储上构建日志
    pub fn build_with<S: Storage>(&self, storage: S) -> Result<BoundedLog<S>> {
        BoundedLog::new(storage, &self.file_name, &self.header, self.capacity)
    }

    /// 在配置的目录上构建日志
    pub fn build(&self) -> Result<BoundedLog<DirStorage>> {
        self.build_with(self.storage())
    }
}
