//! 主机指标采集库
//!
//! 统一的主机指标访问层：记忆化缓存只计算一次会话内不变的查询，
//! 计数器句柄注册表为每个（类别, 计数器, 实例）保留一个长期句柄，
//! 平台差异收敛在 [`platform::Platform`] 的各个实现中。

pub mod cache;
pub mod context;
pub mod counter;
pub mod error;
pub mod format;
pub mod platform;
pub mod sensors;
pub mod server;
pub mod stats;

// 重新导出主要的公共类型
pub use cache::MetricCache;
pub use context::{ContextRef, MetricsContext, create_context};
pub use counter::{CounterKey, CounterRegistry};
pub use error::{MetricError, Probe, Result};
pub use format::format_bytes;
pub use server::{Config, StatusServer};
pub use stats::{HostInfo, Metric, MetricValue, SystemStats};
