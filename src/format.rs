use std::fmt;

/// 字节单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Unit {
    B,
    KB,
    MB,
    GB,
    TB,
    PB,
    EB,
}

impl Unit {
    const ALL: [Unit; 7] = [
        Unit::B,
        Unit::KB,
        Unit::MB,
        Unit::GB,
        Unit::TB,
        Unit::PB,
        Unit::EB,
    ];

    /// 按除以 1024 的次数选择单位，超出范围时停在最大单位
    #[inline]
    pub fn from_index(index: usize) -> Unit {
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Unit::B => "B",
            Unit::KB => "KB",
            Unit::MB => "MB",
            Unit::GB => "GB",
            Unit::TB => "TB",
            Unit::PB => "PB",
            Unit::EB => "EB",
        })
    }
}

/// 反复除以 1024 直到数值小于 1024，返回缩放后的数值和单位
///
/// 负数和非有限值原样返回，单位为字节。
pub fn scale_bytes(bytes: f64) -> (f64, Unit) {
    if !bytes.is_finite() || bytes < 0.0 {
        return (bytes, Unit::B);
    }

    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < Unit::ALL.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    (value, Unit::from_index(unit))
}

/// 格式化字节数，例如 `1.50 KB`
#[inline]
pub fn format_bytes(bytes: f64) -> String {
    format_bytes_with(bytes, false)
}

/// 格式化字节数；紧凑模式只保留整数部分且不加空格，例如 `1KB`
pub fn format_bytes_with(bytes: f64, compact: bool) -> String {
    let (value, unit) = scale_bytes(bytes);
    if compact {
        format!("{}{unit}", value as i64)
    } else {
        format!("{value:.2} {unit}")
    }
}
