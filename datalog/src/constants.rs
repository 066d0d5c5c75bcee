//! 常量定义
//!
//! 有界 CSV 日志的默认参数和缓冲区大小

/// 默认表头行
pub const DEFAULT_HEADER: &str = "timestamp,voltage,current,power\n";
/// 默认容量 (1MB)
pub const DEFAULT_CAPACITY: u64 = 1024 * 1024;
/// 紧凑分区容量 (700KB)
pub const COMPACT_CAPACITY: u64 = 700 * 1024;
/// 默认存储挂载目录
pub const DEFAULT_BASE_PATH: &str = "/littlefs";
/// 默认日志文件名
pub const DEFAULT_FILE_NAME: &str = "datalog.csv";

/// 单条记录最大长度（包含换行符）
pub const MAX_RECORD_LEN: usize = 99;
/// 搬移缓冲区大小
pub const COPY_BUF_SIZE: usize = 256;
/// 按行扫描时的读缓冲区大小
pub const LINE_BUF_SIZE: usize = 256;
/// 数值字段小数位数
pub const VALUE_PRECISION: usize = 3;
