use std::fmt;

/// 指标获取错误类型
#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    /// 当前平台不提供该能力
    #[error("不支持的平台能力: {0}")]
    Unsupported(&'static str),
    /// 能力存在但无权访问（例如缺少管理员权限）
    #[error("权限不足: {0}")]
    PermissionDenied(String),
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("查询失败: {0}")]
    Query(String),
    #[error("解析错误: {0}")]
    Parse(String),
    #[error("未知指标: {0}")]
    UnknownMetric(String),
    #[error("未知计数器: {0}")]
    UnknownCounter(String),
    /// 计数器存在，但实例（网卡、磁盘、进程）当前不存在或已消失
    #[error("计数器实例不存在: {0}")]
    MissingInstance(String),
}

impl MetricError {
    /// 平台不可用类错误：在访问器边界降级为默认值，而不是向上传播
    ///
    /// 已消失的实例属于缺失数据，同样降级。
    #[inline]
    pub fn is_unavailable(&self) -> bool {
        match self {
            MetricError::Unsupported(_)
            | MetricError::PermissionDenied(_)
            | MetricError::MissingInstance(_) => true,
            MetricError::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MetricError>;

/// 三态读数：区分"有值"、"查询成功但没有传感器"和"平台不支持"
///
/// 读取失败不属于这三种状态，而是以 `Err(MetricError)` 返回。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Probe<T> {
    Value(T),
    Absent,
    Unsupported,
}

impl<T> Probe<T> {
    #[inline]
    pub fn value(self) -> Option<T> {
        match self {
            Probe::Value(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn is_value(&self) -> bool {
        matches!(self, Probe::Value(_))
    }
}

impl<T: fmt::Display> fmt::Display for Probe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Value(v) => write!(f, "{v}"),
            Probe::Absent => write!(f, "无传感器"),
            Probe::Unsupported => write!(f, "不支持"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_error_display() {
        let err = MetricError::Unsupported("性能计数器");
        assert_eq!(err.to_string(), "不支持的平台能力: 性能计数器");

        let err = MetricError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "test error",
        ));
        assert_eq!(err.to_string(), "IO 错误: test error");

        let err = MetricError::Parse("bad".to_string());
        assert_eq!(err.to_string(), "解析错误: bad");
    }

    #[test]
    fn test_unavailable_classification() {
        assert!(MetricError::Unsupported("x").is_unavailable());
        assert!(MetricError::PermissionDenied("x".into()).is_unavailable());
        assert!(
            MetricError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
                .is_unavailable()
        );
        assert!(!MetricError::from(std::io::Error::from(std::io::ErrorKind::NotFound))
            .is_unavailable());
        assert!(!MetricError::Query("timeout".into()).is_unavailable());
        assert!(MetricError::MissingInstance("veth0".into()).is_unavailable());
        assert!(!MetricError::UnknownCounter("x".into()).is_unavailable());
    }

    #[test]
    fn test_probe_states() {
        assert_eq!(Probe::Value(41.5f32).value(), Some(41.5));
        assert_eq!(Probe::<f32>::Absent.value(), None);
        assert!(!Probe::<f32>::Unsupported.is_value());
        assert_eq!(Probe::Value(40).to_string(), "40");
        assert_eq!(Probe::<i32>::Absent.to_string(), "无传感器");
    }
}
