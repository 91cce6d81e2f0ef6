use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

/// 忽略锁中毒：计算闭包 panic 时槽位仍为空，后续调用会重新计算
#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 单个键对应的槽位，计算期间持有该槽位的锁
struct Slot<V> {
    value: Mutex<Option<V>>,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }
}

/// 每个键至多初始化一次的并发映射
///
/// 外层锁只在查找/插入槽位时持有；真正的计算在槽位锁内进行，
/// 因此同一个键的并发调用会排队等待第一次计算的结果，
/// 而不同键之间互不阻塞。计算失败不会写入槽位，下一个调用者会重试；
/// 失败后无人等待的空槽位随即移除，映射不会因失败的键而增长。
pub struct OnceMap<K, V> {
    slots: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K, V> Default for OnceMap<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> OnceMap<K, V> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Arc<Slot<V>> {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get(key) {
            return slot.clone();
        }
        let slot = Arc::new(Slot::default());
        slots.insert(key.clone(), slot.clone());
        slot
    }

    /// 读取已初始化的值；若该键正在计算，会等待计算结束
    pub fn get(&self, key: &K) -> Option<V> {
        let slot = lock(&self.slots).get(key).cloned()?;
        let value = lock(&slot.value);
        value.clone()
    }

    /// 返回已有值，或执行 `init` 并保存成功结果
    ///
    /// `init` 失败时，若没有其他调用者在等待该槽位，空槽位会被移除。
    pub fn get_or_try_init<E, F>(&self, key: &K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = self.slot(key);
        let err = {
            let mut value = lock(&slot.value);
            if let Some(v) = value.as_ref() {
                return Ok(v.clone());
            }
            match init() {
                Ok(v) => {
                    *value = Some(v.clone());
                    return Ok(v);
                }
                Err(e) => e,
            }
        };

        self.evict_if_unused(key, &slot);
        Err(err)
    }

    /// 槽位仍为空且只被映射和当前调用者引用时移除
    ///
    /// 外层锁内不会有新的引用产生；引用计数为 2 时没有人持有槽位锁。
    fn evict_if_unused(&self, key: &K, slot: &Arc<Slot<V>>) {
        let mut slots = lock(&self.slots);
        let unused = slots.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, slot)
                && Arc::strong_count(slot) == 2
                && lock(&slot.value).is_none()
        });
        if unused {
            slots.remove(key);
        }
    }

    /// 移除一个键，之后的调用会重新初始化；返回被移除的值
    pub fn remove(&self, key: &K) -> Option<V> {
        let slot = lock(&self.slots).remove(key)?;
        let value = lock(&slot.value);
        value.clone()
    }

    /// 是否已有成功计算的值
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// 已初始化的键数量
    pub fn len(&self) -> usize {
        let slots: Vec<_> = lock(&self.slots).values().cloned().collect();
        slots
            .iter()
            .filter(|slot| lock(&slot.value).is_some())
            .count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 映射中的槽位数量，包括正在计算的空槽位
    pub(crate) fn slot_count(&self) -> usize {
        lock(&self.slots).len()
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

/// 进程级指标记忆化缓存
///
/// 以（逻辑指标名, 值类型）为键，值一旦计算成功便视为常量，
/// 没有过期、淘汰或失效接口。
#[derive(Default)]
pub struct MetricCache {
    entries: OnceMap<(String, TypeId), Entry>,
}

impl MetricCache {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 命中则返回缓存值；否则执行一次 `compute` 并缓存成功结果
    ///
    /// 同一个键的并发调用只会执行一次 `compute`，其余调用者等待并得到同一个结果。
    /// `compute` 失败时错误返回给调用者，且不会被缓存。
    pub fn get_or_compute<T, E, F>(&self, key: &str, compute: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        let key = (key.to_owned(), TypeId::of::<T>());
        let entry = self.entries.get_or_try_init(&key, || {
            debug!("缓存未命中，开始计算: {}", key.0);
            compute().map(|v| Arc::new(v) as Entry)
        })?;

        match entry.downcast_ref::<T>() {
            Some(v) => Ok(v.clone()),
            // 键中包含 TypeId，类型必然一致
            None => unreachable!("缓存条目类型与键不一致: {}", key.0),
        }
    }

    /// 读取已缓存的值，不触发计算
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.entries
            .get(&(key.to_owned(), TypeId::of::<T>()))
            .and_then(|entry| entry.downcast_ref::<T>().cloned())
    }

    pub fn contains<T: 'static>(&self, key: &str) -> bool {
        self.entries.contains(&(key.to_owned(), TypeId::of::<T>()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
