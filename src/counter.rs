use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::cache::OnceMap;
use crate::error::Result;

/// 性能计数器三元组：类别、计数器名、实例名
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub category: String,
    pub counter: String,
    pub instance: Option<String>,
}

impl CounterKey {
    pub fn new(category: &str, counter: &str, instance: Option<&str>) -> Self {
        Self {
            category: category.to_string(),
            counter: counter.to_string(),
            instance: instance.map(str::to_string),
        }
    }

    pub fn cpu_total() -> Self {
        Self::new("Processor", "% Processor Time", Some("_Total"))
    }

    pub fn memory(counter: &str) -> Self {
        Self::new("Memory", counter, None)
    }

    pub fn disk_total(counter: &str) -> Self {
        Self::new("PhysicalDisk", counter, Some("_Total"))
    }

    pub fn network(counter: &str, interface: &str) -> Self {
        Self::new("Network Interface", counter, Some(interface))
    }

    /// 进程计数器；实例名由平台根据进程号解析
    pub fn process(counter: &str, instance: &str) -> Self {
        Self::new("Process", counter, Some(instance))
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.category,
            self.counter,
            self.instance.as_deref().unwrap_or("")
        )
    }
}

/// 平台提供的瞬时测量源
///
/// 速率类计数器需要保存上一次的原始值，所以 `next_value` 接收 `&mut self`。
pub trait CounterSource: Send {
    fn next_value(&mut self) -> Result<f64>;
}

/// 绑定到某个计数器的长生命周期句柄
///
/// 句柄本身不可变，但每次采样得到的是当前瞬时值。
/// 按操作系统惯例，速率类计数器创建后的第一次采样不可靠（通常为 0），
/// 调用方可以通过 [`CounterHandle::is_fresh`] 判断并丢弃。
pub struct CounterHandle {
    key: CounterKey,
    source: Mutex<Box<dyn CounterSource>>,
    samples: AtomicU64,
}

impl CounterHandle {
    pub fn new(key: CounterKey, source: Box<dyn CounterSource>) -> Self {
        Self {
            key,
            source: Mutex::new(source),
            samples: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn key(&self) -> &CounterKey {
        &self.key
    }

    /// 阻塞采样一次，不重试、不超时
    pub fn sample(&self) -> Result<f64> {
        let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        let value = source.next_value()?;
        self.samples.fetch_add(1, Ordering::AcqRel);
        Ok(value)
    }

    /// 尚未成功采样过
    #[inline]
    pub fn is_fresh(&self) -> bool {
        self.samples_taken() == 0
    }

    #[inline]
    pub fn samples_taken(&self) -> u64 {
        self.samples.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CounterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterHandle")
            .field("key", &self.key)
            .field("samples", &self.samples_taken())
            .finish()
    }
}

/// 计数器句柄注册表：每个三元组只创建一个句柄，之后反复采样
///
/// 句柄在注册表存活期间不会关闭，除非其实例已消失并被 [`CounterRegistry::remove`] 移除。
#[derive(Default)]
pub struct CounterRegistry {
    handles: OnceMap<CounterKey, Arc<CounterHandle>>,
}

impl CounterRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回已有句柄，或调用 `open` 创建并注册新句柄
    ///
    /// 同一个三元组的并发调用只会执行一次 `open`；创建失败不会被缓存。
    pub fn get_or_create_handle<F>(&self, key: &CounterKey, open: F) -> Result<Arc<CounterHandle>>
    where
        F: FnOnce(&CounterKey) -> Result<Box<dyn CounterSource>>,
    {
        self.handles.get_or_try_init(key, || {
            debug!("创建计数器句柄: {key}");
            let source = open(key)?;
            Ok(Arc::new(CounterHandle::new(key.clone(), source)))
        })
    }

    pub fn get(&self, key: &CounterKey) -> Option<Arc<CounterHandle>> {
        self.handles.get(key)
    }

    /// 注销句柄；已取得该句柄的调用者仍可继续使用
    pub fn remove(&self, key: &CounterKey) -> Option<Arc<CounterHandle>> {
        let handle = self.handles.remove(key);
        if handle.is_some() {
            debug!("注销计数器句柄: {key}");
        }
        handle
    }

    /// 已注册的句柄数量
    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
