//! 错误类型

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 日志错误
#[derive(Error, Debug)]
pub enum LogError {
    #[error("failed to mount or format filesystem: {0}")]
    MountFailure(String),
    #[error("storage partition not found: {}", .0.display())]
    PartitionNotFound(PathBuf),
    #[error("log file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("corrupt log: {0}")]
    CorruptLog(String),
    #[error("record format error: {0}")]
    Format(String),
    #[error("log is inert after failed initialization")]
    Inert,
    #[error("log not initialized")]
    NotInitialized,
    #[error("config error: {0}")]
    Config(String),
}

impl LogError {
    /// 包装 I/O 错误并标注失败的操作
    pub fn io(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| LogError::Io { op, source }
    }
}

pub type Result<T> = std::result::Result<T, LogError>;
