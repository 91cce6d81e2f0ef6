use std::sync::Arc;

use log::{debug, info, warn};

use crate::cache::MetricCache;
use crate::counter::{CounterHandle, CounterKey, CounterRegistry};
use crate::error::{MetricError, Result};
use crate::platform::{self, Capability, Platform};

/// 指标上下文：持有记忆化缓存、计数器句柄注册表和选定的平台实现
///
/// 显式构造并通过 `Arc` 注入调用方；同一个上下文的所有克隆共享同一份缓存和句柄，
/// 生命周期等同于进程内的全局状态，但测试可以各自创建互不干扰的实例。
pub struct MetricsContext {
    cache: MetricCache,
    counters: CounterRegistry,
    platform: Arc<dyn Platform>,
    compact_format: bool,
}

impl MetricsContext {
    /// 创建上下文，并预热 CPU 计数器使第一次读取到的负载有效
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        let context = Self {
            cache: MetricCache::new(),
            counters: CounterRegistry::new(),
            platform,
            compact_format: false,
        };
        context.prime_cpu_counter();
        context
    }

    /// 使用当前目标平台创建上下文
    pub fn detect() -> Self {
        let platform = platform::detect();
        info!("平台实现: {}", platform.name());
        Self::new(platform)
    }

    /// 紧凑格式：字节数只保留整数，百分比不附带明细
    #[inline]
    pub fn with_compact_format(mut self, compact: bool) -> Self {
        self.compact_format = compact;
        self
    }

    fn prime_cpu_counter(&self) {
        if !self.platform.supports(Capability::PerformanceCounters) {
            debug!("平台 {} 不支持性能计数器，跳过预热", self.platform.name());
            return;
        }
        if let Err(e) = self.sample_counter(&CounterKey::cpu_total()) {
            warn!("CPU 计数器预热失败: {e}");
        }
    }

    #[inline]
    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    #[inline]
    pub fn counters(&self) -> &CounterRegistry {
        &self.counters
    }

    #[inline]
    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    #[inline]
    pub fn compact_format(&self) -> bool {
        self.compact_format
    }

    /// 取得（必要时创建）计数器句柄
    pub fn counter_handle(&self, key: &CounterKey) -> Result<Arc<CounterHandle>> {
        self.counters
            .get_or_create_handle(key, |key| self.platform.open_counter(key))
    }

    /// 按键采样计数器
    ///
    /// 实例已消失的句柄会被注销，实例重新出现后再次采样时重新打开。
    pub fn sample_counter(&self, key: &CounterKey) -> Result<f64> {
        let result = self.counter_handle(key)?.sample();
        if let Err(MetricError::MissingInstance(_)) = &result {
            debug!("计数器实例已消失: {key}");
            self.counters.remove(key);
        }
        result
    }
}

/// 上下文类型别名
pub type ContextRef = Arc<MetricsContext>;

/// 创建当前平台上下文的便捷函数
#[inline]
pub fn create_context(compact_format: bool) -> ContextRef {
    Arc::new(MetricsContext::detect().with_compact_format(compact_format))
}
