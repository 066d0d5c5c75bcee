//! datalog - 有界 CSV 遥测日志
//!
//! 特性：
//! - 容量上限：文件大小始终不超过配置的 capacity
//! - 表头常驻：第一行表头永不淘汰
//! - 原地轮转：空间不足时淘汰最旧记录，在同一文件内前移，不需要第二个文件
//! - 固定缓冲：轮转只使用固定大小的缓冲区，内存占用与文件大小无关
//! - 断电容忍：搬移完成后才截断，最坏情况只丢失当前这条记录

pub mod bounded_log;
pub mod config;
pub mod constants;
pub mod error;
pub mod record;
pub mod storage;


pub use bounded_log::{BoundedLog, LogStats, Records};
pub use config::DataLogConfig;
pub use error::{LogError, Result};
pub use record::Record;
pub use storage::{
    DirStorage, LogFile, MemFile, MemStorage, MountFault, OpenMode, Storage, StorageInfo,
    WriteFault,
};
