//! 采样记录
//!
//! 单条采样的 CSV 行格式化与解析：
//! ```text
//! <timestamp>,<voltage>,<current>,<power>\n
//! ```
//! 数值字段固定保留 3 位小数，时间戳为无符号十进制整数。

use std::fmt;
use std::str::FromStr;

use crate::constants::{MAX_RECORD_LEN, VALUE_PRECISION};
use crate::error::{LogError, Result};

/// 单条采样记录
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    /// 秒级时间戳
    pub timestamp: u64,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl Record {
    pub fn new(timestamp: u64, voltage: f64, current: f64, power: f64) -> Self {
        Self {
            timestamp,
            voltage,
            current,
            power,
        }
    }

    /// 使用当前时间戳创建记录
    pub fn now(voltage: f64, current: f64, power: f64) -> Self {
        Self::new(current_timestamp(), voltage, current, power)
    }

    /// 格式化为带换行符的完整行
    pub fn to_line(&self) -> Result<String> {
        for (name, value) in [
            ("voltage", self.voltage),
            ("current", self.current),
            ("power", self.power),
        ] {
            if !value.is_finite() {
                return Err(LogError::Format(format!("{} is not finite: {}", name, value)));
            }
        }

        let line = format!("{}\n", self);
        if line.len() > MAX_RECORD_LEN {
            return Err(LogError::Format(format!(
                "record line too long: {} bytes (max {})",
                line.len(),
                MAX_RECORD_LEN
            )));
        }
        Ok(line)
    }

    /// 按固定精度截断后的值，与写入文件后再读回的结果一致
    pub fn rounded(&self) -> Self {
        let round = |v: f64| -> f64 {
            format!("{:.prec$}", v, prec = VALUE_PRECISION)
                .parse()
                .unwrap_or(v)
        };
        Self::new(
            self.timestamp,
            round(self.voltage),
            round(self.current),
            round(self.power),
        )
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{:.prec$},{:.prec$},{:.prec$}",
            self.timestamp,
            self.voltage,
            self.current,
            self.power,
            prec = VALUE_PRECISION
        )
    }
}

impl FromStr for Record {
    type Err = LogError;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 4 {
            return Err(LogError::Format(format!(
                "expected 4 fields, got {}: {:?}",
                fields.len(),
                line
            )));
        }

        let timestamp = fields[0]
            .trim()
            .parse::<u64>()
            .map_err(|e| LogError::Format(format!("bad timestamp {:?}: {}", fields[0], e)))?;
        let value = |idx: usize| -> Result<f64> {
            fields[idx]
                .trim()
                .parse::<f64>()
                .map_err(|e| LogError::Format(format!("bad value {:?}: {}", fields[idx], e)))
        };

        Ok(Self::new(timestamp, value(1)?, value(2)?, value(3)?))
    }
}

/// 获取当前时间戳（秒）
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_fixed_precision() {
        let record = Record::new(1700000000, 12.0, 0.5, 6.25);
        assert_eq!(record.to_line().unwrap(), "1700000000,12.000,0.500,6.250\n");
    }

    #[test]
    fn test_parse_line() {
        let record: Record = "42,3.300,-0.125,0.000\n".parse().unwrap();
        assert_eq!(record, Record::new(42, 3.3, -0.125, 0.0));

        // 兼容 CRLF
        let record: Record = "7,1.000,2.000,3.000\r\n".parse().unwrap();
        assert_eq!(record.timestamp, 7);
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert!("timestamp,voltage,current,power".parse::<Record>().is_err());
        assert!("1,2,3".parse::<Record>().is_err());
        assert!("-1,2.000,3.000,4.000".parse::<Record>().is_err());
        assert!("1,2.000,3.000,4.000,5.000".parse::<Record>().is_err());
    }

    #[test]
    fn test_non_finite_rejected() {
        let record = Record::new(1, f64::NAN, 0.0, 0.0);
        assert!(matches!(record.to_line(), Err(LogError::Format(_))));
        let record = Record::new(1, 0.0, f64::INFINITY, 0.0);
        assert!(matches!(record.to_line(), Err(LogError::Format(_))));
    }

    #[test]
    fn test_too_long_rejected() {
        let record = Record::new(u64::MAX, 1e30, 1e30, 1e30);
        assert!(matches!(record.to_line(), Err(LogError::Format(_))));
    }

    #[test]
    fn test_max_width_fits() {
        // 最大时间戳 + 较大数值仍在限制内
        let record = Record::new(u64::MAX, -99999.999, -99999.999, -99999.999);
        let line = record.to_line().unwrap();
        assert!(line.len() <= MAX_RECORD_LEN);
    }

    #[test]
    fn test_rounded_matches_parse() {
        let record = Record::new(5, 1.23456, 2.0004, 9.9995);
        let parsed: Record = record.to_line().unwrap().parse().unwrap();
        assert_eq!(parsed, record.rounded());
    }
}
