use std::fmt;
use std::net::{IpAddr, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::context::ContextRef;
use crate::counter::CounterKey;
use crate::error::{MetricError, Probe, Result};
use crate::format::format_bytes_with;
use crate::platform::{Capability, Platform};
use crate::sensors::{SensorValue, parse_document};

/// 处理器信息
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CpuInfo {
    pub device_id: String,
    /// 型号名称
    pub name: String,
    pub manufacturer: String,
    /// 当前主频（MHz）
    pub current_clock_speed: Option<u32>,
    /// 最大主频（MHz）
    pub max_clock_speed: Option<u32>,
    /// 数据位宽
    pub data_width: Option<u32>,
    pub serial_number: Option<String>,
    pub number_of_cores: u32,
    pub number_of_logical_processors: u32,
}

impl fmt::Display for CpuInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}) {} 核 / {} 线程",
            self.device_id,
            self.name,
            self.manufacturer,
            self.number_of_cores,
            self.number_of_logical_processors
        )?;
        if let Some(mhz) = self.current_clock_speed {
            write!(f, " @ {mhz} MHz")?;
        }
        Ok(())
    }
}

/// 物理磁盘信息
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DiskInfo {
    pub index: u32,
    pub model: String,
    pub media_type: String,
    pub serial_number: String,
    /// 总容量（字节）
    pub total: u64,
}

impl fmt::Display for DiskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} [{}] {} SN:{}",
            self.index,
            self.model,
            self.media_type,
            format_bytes_with(self.total as f64, false),
            self.serial_number
        )
    }
}

/// 主板与机器标识
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BiosInfo {
    pub manufacturer: String,
    /// 主板序列号
    pub id: String,
    pub model: String,
    /// BIOS 序列号
    pub serial_number: String,
    /// 机器 GUID
    pub guid: String,
    /// 硬件配置 UUID
    pub uuid: String,
}

impl fmt::Display for BiosInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "制造商: {}", self.manufacturer)?;
        writeln!(f, "主板编号: {}", self.id)?;
        writeln!(f, "型号: {}", self.model)?;
        writeln!(f, "序列号: {}", self.serial_number)?;
        writeln!(f, "GUID: {}", self.guid)?;
        write!(f, "UUID: {}", self.uuid)
    }
}

/// 内存概况（字节）
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RamInfo {
    pub total_physical: u64,
    pub available_physical: u64,
    pub used_physical: u64,
    /// 提交上限（物理内存 + 页面文件）
    pub commit_limit: u64,
    pub committed: u64,
    pub available_commit: u64,
    /// 已提交字节占比 (0-100)
    pub commit_usage_percent: f64,
}

impl fmt::Display for RamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = |v: u64| format_bytes_with(v as f64, false);
        writeln!(
            f,
            "物理内存: {} / {} (可用 {})",
            b(self.used_physical),
            b(self.total_physical),
            b(self.available_physical)
        )?;
        write!(
            f,
            "虚拟内存: {} / {} (可用 {}, {:.2}%)",
            b(self.committed),
            b(self.commit_limit),
            b(self.available_commit),
            self.commit_usage_percent
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskData {
    Read,
    Write,
    ReadAndWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetData {
    Received,
    Sent,
    ReceivedAndSent,
}

/// 当前进程 CPU 使用率的测量窗口
pub const CURRENT_PROCESS_CPU_WINDOW: Duration = Duration::from_millis(500);

/// 可按名称查询的指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    CpuLoad,
    ProcessorCount,
    CpuCount,
    CpuInfo,
    CpuTemperature,
    MemoryAvailable,
    MemoryFree,
    TotalPhysicalMemory,
    UsedPhysicalMemory,
    RamInfo,
    VirtualMemoryUsage,
    VirtualMemoryUsed,
    VirtualMemoryTotal,
    MemoryVData,
    MemoryPData,
    DiskRead,
    DiskWrite,
    DiskReadWrite,
    DiskInfo,
    NetReceived,
    NetSent,
    NetReceivedSent,
    MacAddresses,
    NetworkCardAddress,
    LocalIp,
    LocalIps,
    BootTime,
    SystemType,
    BiosSerialNumber,
    BiosInfo,
    OpenWindows,
    SensorValues,
    CurrentProcessCpu,
    CurrentProcessMemory,
}

impl Metric {
    pub const ALL: [Metric; 34] = [
        Metric::CpuLoad,
        Metric::ProcessorCount,
        Metric::CpuCount,
        Metric::CpuInfo,
        Metric::CpuTemperature,
        Metric::MemoryAvailable,
        Metric::MemoryFree,
        Metric::TotalPhysicalMemory,
        Metric::UsedPhysicalMemory,
        Metric::RamInfo,
        Metric::VirtualMemoryUsage,
        Metric::VirtualMemoryUsed,
        Metric::VirtualMemoryTotal,
        Metric::MemoryVData,
        Metric::MemoryPData,
        Metric::DiskRead,
        Metric::DiskWrite,
        Metric::DiskReadWrite,
        Metric::DiskInfo,
        Metric::NetReceived,
        Metric::NetSent,
        Metric::NetReceivedSent,
        Metric::MacAddresses,
        Metric::NetworkCardAddress,
        Metric::LocalIp,
        Metric::LocalIps,
        Metric::BootTime,
        Metric::SystemType,
        Metric::BiosSerialNumber,
        Metric::BiosInfo,
        Metric::OpenWindows,
        Metric::SensorValues,
        Metric::CurrentProcessCpu,
        Metric::CurrentProcessMemory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::CpuLoad => "cpu_load",
            Metric::ProcessorCount => "processor_count",
            Metric::CpuCount => "cpu_count",
            Metric::CpuInfo => "cpu_info",
            Metric::CpuTemperature => "cpu_temperature",
            Metric::MemoryAvailable => "memory_available",
            Metric::MemoryFree => "memory_free",
            Metric::TotalPhysicalMemory => "total_physical_memory",
            Metric::UsedPhysicalMemory => "used_physical_memory",
            Metric::RamInfo => "ram_info",
            Metric::VirtualMemoryUsage => "virtual_memory_usage",
            Metric::VirtualMemoryUsed => "virtual_memory_used",
            Metric::VirtualMemoryTotal => "virtual_memory_total",
            Metric::MemoryVData => "memory_v_data",
            Metric::MemoryPData => "memory_p_data",
            Metric::DiskRead => "disk_read",
            Metric::DiskWrite => "disk_write",
            Metric::DiskReadWrite => "disk_read_write",
            Metric::DiskInfo => "disk_info",
            Metric::NetReceived => "net_received",
            Metric::NetSent => "net_sent",
            Metric::NetReceivedSent => "net_received_sent",
            Metric::MacAddresses => "mac_addresses",
            Metric::NetworkCardAddress => "network_card_address",
            Metric::LocalIp => "local_ip",
            Metric::LocalIps => "local_ips",
            Metric::BootTime => "boot_time",
            Metric::SystemType => "system_type",
            Metric::BiosSerialNumber => "bios_serial_number",
            Metric::BiosInfo => "bios_info",
            Metric::OpenWindows => "open_windows",
            Metric::SensorValues => "sensor_values",
            Metric::CurrentProcessCpu => "current_process_cpu",
            Metric::CurrentProcessMemory => "current_process_memory",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| MetricError::UnknownMetric(s.to_string()))
    }
}

/// 按名称查询得到的指标值
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Count(u64),
    /// 字节数
    Bytes(u64),
    /// 每秒字节数
    Rate(f64),
    Percent(f64),
    Text(String),
    List(Vec<String>),
    Temperature(Probe<f32>),
    Time(Option<DateTime<Utc>>),
    Address(Option<IpAddr>),
    Addresses(Vec<IpAddr>),
    Cpus(Vec<CpuInfo>),
    Ram(RamInfo),
    Disks(Vec<DiskInfo>),
    Bios(BiosInfo),
    Sensors(Vec<SensorValue>),
}

fn write_lines<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            writeln!(f)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Count(n) => write!(f, "{n}"),
            MetricValue::Bytes(n) => f.write_str(&format_bytes_with(*n as f64, false)),
            MetricValue::Rate(r) => write!(f, "{}/s", format_bytes_with(*r, false)),
            MetricValue::Percent(p) => write!(f, "{p:.2}%"),
            MetricValue::Text(s) => f.write_str(s),
            MetricValue::List(items) => write_lines(f, items),
            MetricValue::Temperature(Probe::Value(t)) => write!(f, "{t:.2} °C"),
            MetricValue::Temperature(reading) => write!(f, "{reading}"),
            MetricValue::Time(Some(t)) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S UTC")),
            MetricValue::Time(None) => Ok(()),
            MetricValue::Address(Some(ip)) => write!(f, "{ip}"),
            MetricValue::Address(None) => Ok(()),
            MetricValue::Addresses(addresses) => write_lines(f, addresses),
            MetricValue::Cpus(cpus) => write_lines(f, cpus),
            MetricValue::Ram(ram) => write!(f, "{ram}"),
            MetricValue::Disks(disks) => write_lines(f, disks),
            MetricValue::Bios(bios) => write!(f, "{bios}"),
            MetricValue::Sensors(sensors) => write_lines(f, sensors),
        }
    }
}

/// 平台不可用类错误降级为默认值；瞬时错误原样返回
fn or_default<T: Default>(what: &str, result: Result<T>) -> Result<T> {
    match result {
        Err(e @ MetricError::MissingInstance(_)) => {
            debug!("{what} 缺少数据，返回默认值: {e}");
            Ok(T::default())
        }
        Err(e) if e.is_unavailable() => {
            warn!("{what} 不可用，返回默认值: {e}");
            Ok(T::default())
        }
        other => other,
    }
}

/// 主机信息访问器
///
/// 每个访问器在接触缓存之前先检查平台能力，不支持时直接返回文档约定的默认值
/// （空字符串、0、空列表）。会话内不变的查询经由 [`MetricCache`](crate::cache::MetricCache)
/// 只计算一次；随时间变化的读数经由计数器句柄采样。
#[derive(Clone)]
pub struct HostInfo {
    context: ContextRef,
}

impl HostInfo {
    #[inline]
    pub fn new(context: ContextRef) -> Self {
        Self { context }
    }

    #[inline]
    pub fn context(&self) -> &ContextRef {
        &self.context
    }

    #[inline]
    fn platform(&self) -> &dyn Platform {
        self.context.platform()
    }

    #[inline]
    fn supports(&self, capability: Capability) -> bool {
        self.platform().supports(capability)
    }

    /// 带能力检查的记忆化查询
    fn cached<T, F>(&self, capability: Capability, key: &str, compute: F) -> Result<T>
    where
        T: Default + Clone + Send + Sync + 'static,
        F: FnOnce(&dyn Platform) -> Result<T>,
    {
        if !self.supports(capability) {
            return Ok(T::default());
        }
        let platform = self.platform();
        or_default(
            key,
            self.context.cache().get_or_compute(key, || compute(platform)),
        )
    }

    /// 带能力检查的计数器采样
    fn counter(&self, key: CounterKey) -> Result<f64> {
        if !self.supports(Capability::PerformanceCounters) {
            return Ok(0.0);
        }
        or_default("性能计数器", self.context.sample_counter(&key))
    }

    #[inline]
    fn bytes(&self, value: f64) -> String {
        format_bytes_with(value, self.context.compact_format())
    }

    // ---- CPU ----

    /// CPU 总占用率（百分比）
    pub fn cpu_load(&self) -> Result<f64> {
        self.counter(CounterKey::cpu_total())
    }

    /// 逻辑处理器数量
    pub fn processor_count(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// 物理处理器（插槽）数量
    pub fn cpu_count(&self) -> Result<usize> {
        self.cached(Capability::SystemQuery, "cpu_count", |p| p.cpu_count())
    }

    pub fn cpu_info(&self) -> Result<Vec<CpuInfo>> {
        self.cached(Capability::SystemQuery, "cpu_info", |p| p.cpu_info())
    }

    /// CPU 温度（摄氏度）
    ///
    /// 查询失败返回 `Err`；平台不支持返回 [`Probe::Unsupported`]；没有传感器返回 [`Probe::Absent`]。
    pub fn cpu_temperature(&self) -> Result<Probe<f32>> {
        if !self.supports(Capability::Thermal) {
            return Ok(Probe::Unsupported);
        }
        match self.platform().cpu_temperature() {
            Err(e) if e.is_unavailable() => {
                debug!("温度传感器不可用: {e}");
                Ok(Probe::Unsupported)
            }
            other => other,
        }
    }

    // ---- 内存 ----

    /// 可用物理内存（字节）
    pub fn memory_available(&self) -> Result<u64> {
        Ok(self.counter(CounterKey::memory("Available Bytes"))? as u64)
    }

    /// 完全空闲的物理内存（字节），不含可回收的缓存
    pub fn memory_free(&self) -> Result<u64> {
        Ok(self.counter(CounterKey::memory("Free & Zero Page List Bytes"))? as u64)
    }

    /// 物理内存总量（字节）
    pub fn total_physical_memory(&self) -> Result<u64> {
        self.cached(Capability::SystemQuery, "total_physical_memory", |p| {
            p.total_physical_memory()
        })
    }

    pub fn used_physical_memory(&self) -> Result<u64> {
        let total = self.total_physical_memory()?;
        Ok(total.saturating_sub(self.memory_available()?))
    }

    /// 虚拟内存使用率（百分比）
    pub fn virtual_memory_usage(&self) -> Result<f64> {
        self.counter(CounterKey::memory("% Committed Bytes In Use"))
    }

    /// 已提交的虚拟内存（字节）
    pub fn virtual_memory_used(&self) -> Result<u64> {
        Ok(self.counter(CounterKey::memory("Committed Bytes"))? as u64)
    }

    /// 虚拟内存提交上限（字节）
    pub fn virtual_memory_total(&self) -> Result<u64> {
        Ok(self.counter(CounterKey::memory("Commit Limit"))? as u64)
    }

    pub fn ram_info(&self) -> Result<RamInfo> {
        let total_physical = self.total_physical_memory()?;
        let available_physical = self.memory_available()?;
        let commit_limit = self.virtual_memory_total()?;
        let committed = self.virtual_memory_used()?;

        Ok(RamInfo {
            total_physical,
            available_physical,
            used_physical: total_physical.saturating_sub(available_physical),
            commit_limit,
            committed,
            available_commit: commit_limit.saturating_sub(committed),
            commit_usage_percent: self.virtual_memory_usage()?,
        })
    }

    /// 虚拟内存使用详情，例如 `50.00% (8.00 GB / 16.00 GB) `
    pub fn memory_v_data(&self) -> Result<String> {
        if !self.supports(Capability::PerformanceCounters) {
            return Ok(String::new());
        }
        let usage = self.virtual_memory_usage()?;
        let used = self.virtual_memory_used()?;
        let limit = self.virtual_memory_total()?;
        Ok(format!(
            "{usage:.2}% ({} / {}) ",
            self.bytes(used as f64),
            self.bytes(limit as f64)
        ))
    }

    /// 物理内存使用详情，例如 `75.00% (12.00 GB / 16.00 GB)`；紧凑格式只输出 `75%`
    pub fn memory_p_data(&self) -> Result<String> {
        let total = self.total_physical_memory()?;
        if total == 0 {
            return Ok(String::new());
        }
        let used = total.saturating_sub(self.memory_available()?) as f64;
        let percent = used / total as f64 * 100.0;

        if self.context.compact_format() {
            Ok(format!("{}%", percent as i64))
        } else {
            Ok(format!(
                "{percent:.2}% ({} / {})",
                self.bytes(used),
                self.bytes(total as f64)
            ))
        }
    }

    // ---- 磁盘 ----

    /// 磁盘读写速率（字节/秒）
    pub fn disk_data(&self, data: DiskData) -> Result<f64> {
        let read = || self.counter(CounterKey::disk_total("Disk Read Bytes/sec"));
        let write = || self.counter(CounterKey::disk_total("Disk Write Bytes/sec"));
        match data {
            DiskData::Read => read(),
            DiskData::Write => write(),
            DiskData::ReadAndWrite => Ok(read()? + write()?),
        }
    }

    /// 物理磁盘列表，按索引排序
    pub fn disk_info(&self) -> Result<Vec<DiskInfo>> {
        self.cached(Capability::SystemQuery, "disk_info", |p| {
            let mut disks = p.disk_info()?;
            disks.sort_by_key(|d| d.index);
            Ok(disks)
        })
    }

    // ---- 网络 ----

    fn network_instances(&self) -> Result<Vec<String>> {
        self.cached(Capability::SystemQuery, "network_instances", |p| {
            p.network_instances()
        })
    }

    /// 所有网络接口的传输速率之和（字节/秒）
    ///
    /// 实例列表只查询一次；之后消失的接口按 0 计入。
    pub fn net_data(&self, data: NetData) -> Result<f64> {
        let mut total = 0.0;
        for instance in self.network_instances()? {
            let received = || self.counter(CounterKey::network("Bytes Received/sec", &instance));
            let sent = || self.counter(CounterKey::network("Bytes Sent/sec", &instance));
            total += match data {
                NetData::Received => received()?,
                NetData::Sent => sent()?,
                NetData::ReceivedAndSent => received()? + sent()?,
            };
        }
        Ok(total)
    }

    pub fn mac_addresses(&self) -> Result<Vec<String>> {
        if !self.supports(Capability::SystemQuery) {
            return Ok(Vec::new());
        }
        or_default("网卡地址", self.platform().mac_addresses())
    }

    pub fn network_card_address(&self) -> Result<String> {
        self.cached(Capability::SystemQuery, "network_card_address", |p| {
            p.network_card_address()
        })
    }

    /// 当前出口路由使用的本机地址；离线时为 None
    ///
    /// 只在本地查询路由表，不会发送任何数据包。
    pub fn local_used_ip(&self) -> Option<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        socket.local_addr().ok().map(|addr| addr.ip())
    }

    /// 启用状态的非回环网卡上的全部单播地址
    pub fn local_ips(&self) -> Result<Vec<IpAddr>> {
        if !self.supports(Capability::SystemQuery) {
            return Ok(Vec::new());
        }
        or_default("本机地址", self.platform().local_ips())
    }

    // ---- 进程 ----

    /// 按进程号采样 `Process` 计数器；进程不存在时为 0
    ///
    /// `prime` 为真时，句柄创建后先丢弃一次采样。
    fn process_counter(&self, pid: u32, counter: &str, prime: bool) -> Result<f64> {
        if !self.supports(Capability::PerformanceCounters) {
            return Ok(0.0);
        }
        let instance = match self.platform().process_instance(pid) {
            Ok(instance) => instance,
            Err(e) if e.is_unavailable() => {
                debug!("进程 {pid} 不可用: {e}");
                return Ok(0.0);
            }
            Err(e) => return Err(e),
        };
        let key = CounterKey::process(counter, &instance);
        if prime && self.context.counters().get(&key).is_none() {
            or_default("进程计数器预热", self.context.sample_counter(&key))?;
        }
        self.counter(key)
    }

    /// 进程 CPU 使用率（占整机的百分比）
    pub fn process_cpu_usage(&self, pid: u32) -> Result<f64> {
        let value = self.process_counter(pid, "% Processor Time", true)?;
        Ok(value / self.processor_count() as f64)
    }

    /// 进程工作集（字节）
    pub fn process_memory(&self, pid: u32) -> Result<u64> {
        Ok(self.process_counter(pid, "Working Set", false)? as u64)
    }

    /// 当前进程的私有工作集（字节）
    pub fn current_process_memory(&self) -> Result<u64> {
        Ok(self.process_counter(std::process::id(), "Working Set - Private", false)? as u64)
    }

    /// 当前进程在 `window` 时间内的 CPU 使用率，调用会阻塞 `window`
    pub fn current_process_cpu_usage(&self, window: Duration) -> Result<f64> {
        if !self.supports(Capability::PerformanceCounters) {
            return Ok(0.0);
        }
        let pid = std::process::id();
        self.process_cpu_usage(pid)?;
        std::thread::sleep(window);
        self.process_cpu_usage(pid)
    }

    // ---- 系统 ----

    pub fn boot_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.cached(Capability::SystemQuery, "boot_time", |p| {
            p.boot_time().map(Some)
        })
    }

    /// 系统类型，例如 `x64-based PC`；不支持的平台返回 `操作系统-架构`
    pub fn system_type(&self) -> Result<String> {
        or_default(
            "system_type",
            self.context
                .cache()
                .get_or_compute("system_type", || self.platform().system_type()),
        )
    }

    /// 当前可见且带边框的顶层窗口标题
    pub fn open_window_titles(&self) -> Result<Vec<String>> {
        if !self.supports(Capability::Windowing) {
            return Ok(Vec::new());
        }
        or_default("窗口枚举", self.platform().open_window_titles())
    }

    // ---- 主板 ----

    pub fn bios_serial_number(&self) -> Result<String> {
        self.cached(Capability::HardwareIds, "bios_serial_number", |p| {
            p.bios_serial_number().map(|s| s.trim().to_string())
        })
    }

    pub fn bios_info(&self) -> Result<BiosInfo> {
        self.cached(Capability::HardwareIds, "bios_info", |p| {
            let mut info = p.board_info()?;
            info.serial_number = self.bios_serial_number()?;
            Ok(info)
        })
    }

    // ---- 传感器 ----

    /// 共享内存传感器读数；监控软件未运行时返回空列表
    pub fn sensor_values(&self) -> Result<Vec<SensorValue>> {
        if !self.supports(Capability::SensorSharedMemory) {
            return Ok(Vec::new());
        }
        match or_default("共享内存传感器", self.platform().sensor_document())? {
            Some(document) => parse_document(&document),
            None => Ok(Vec::new()),
        }
    }

    // ---- 对外接口 ----

    /// 按名称获取指标
    pub fn metric(&self, name: &str) -> Result<MetricValue> {
        let metric: Metric = name.parse()?;
        self.get(metric)
    }

    pub fn get(&self, metric: Metric) -> Result<MetricValue> {
        Ok(match metric {
            Metric::CpuLoad => MetricValue::Percent(self.cpu_load()?),
            Metric::ProcessorCount => MetricValue::Count(self.processor_count() as u64),
            Metric::CpuCount => MetricValue::Count(self.cpu_count()? as u64),
            Metric::CpuInfo => MetricValue::Cpus(self.cpu_info()?),
            Metric::CpuTemperature => MetricValue::Temperature(self.cpu_temperature()?),
            Metric::MemoryAvailable => MetricValue::Bytes(self.memory_available()?),
            Metric::MemoryFree => MetricValue::Bytes(self.memory_free()?),
            Metric::TotalPhysicalMemory => MetricValue::Bytes(self.total_physical_memory()?),
            Metric::UsedPhysicalMemory => MetricValue::Bytes(self.used_physical_memory()?),
            Metric::RamInfo => MetricValue::Ram(self.ram_info()?),
            Metric::VirtualMemoryUsage => MetricValue::Percent(self.virtual_memory_usage()?),
            Metric::VirtualMemoryUsed => MetricValue::Bytes(self.virtual_memory_used()?),
            Metric::VirtualMemoryTotal => MetricValue::Bytes(self.virtual_memory_total()?),
            Metric::MemoryVData => MetricValue::Text(self.memory_v_data()?),
            Metric::MemoryPData => MetricValue::Text(self.memory_p_data()?),
            Metric::DiskRead => MetricValue::Rate(self.disk_data(DiskData::Read)?),
            Metric::DiskWrite => MetricValue::Rate(self.disk_data(DiskData::Write)?),
            Metric::DiskReadWrite => MetricValue::Rate(self.disk_data(DiskData::ReadAndWrite)?),
            Metric::DiskInfo => MetricValue::Disks(self.disk_info()?),
            Metric::NetReceived => MetricValue::Rate(self.net_data(NetData::Received)?),
            Metric::NetSent => MetricValue::Rate(self.net_data(NetData::Sent)?),
            Metric::NetReceivedSent => MetricValue::Rate(self.net_data(NetData::ReceivedAndSent)?),
            Metric::MacAddresses => MetricValue::List(self.mac_addresses()?),
            Metric::NetworkCardAddress => MetricValue::Text(self.network_card_address()?),
            Metric::LocalIp => MetricValue::Address(self.local_used_ip()),
            Metric::LocalIps => MetricValue::Addresses(self.local_ips()?),
            Metric::BootTime => MetricValue::Time(self.boot_time()?),
            Metric::SystemType => MetricValue::Text(self.system_type()?),
            Metric::BiosSerialNumber => MetricValue::Text(self.bios_serial_number()?),
            Metric::BiosInfo => MetricValue::Bios(self.bios_info()?),
            Metric::OpenWindows => MetricValue::List(self.open_window_titles()?),
            Metric::SensorValues => MetricValue::Sensors(self.sensor_values()?),
            Metric::CurrentProcessCpu => {
                MetricValue::Percent(self.current_process_cpu_usage(CURRENT_PROCESS_CPU_WINDOW)?)
            }
            Metric::CurrentProcessMemory => MetricValue::Bytes(self.current_process_memory()?),
        })
    }

    /// 按（类别, 计数器, 实例）采样
    ///
    /// 与命名指标不同，这里不做默认值降级：不支持或未知的计数器以错误返回。
    pub fn sample_counter(&self, key: &CounterKey) -> Result<f64> {
        self.context.sample_counter(key)
    }

    /// 采集一份概览快照
    pub fn snapshot(&self) -> Result<SystemStats> {
        Ok(SystemStats {
            system_type: self.system_type()?,
            processor_count: self.processor_count(),
            cpu_load: self.cpu_load()?,
            cpu_temperature: self.cpu_temperature()?,
            memory_total: self.total_physical_memory()?,
            memory_available: self.memory_available()?,
            memory_p_data: self.memory_p_data()?,
            memory_v_data: self.memory_v_data()?,
            disk_read: self.disk_data(DiskData::Read)?,
            disk_write: self.disk_data(DiskData::Write)?,
            net_received: self.net_data(NetData::Received)?,
            net_sent: self.net_data(NetData::Sent)?,
            boot_time: self.boot_time()?,
            timestamp: Utc::now(),
        })
    }
}

/// 系统概览快照，用于状态页面和一次性报告
#[derive(Debug, Clone)]
pub struct SystemStats {
    pub system_type: String,
    pub processor_count: usize,
    pub cpu_load: f64,                 // CPU 使用率 (0-100)
    pub cpu_temperature: Probe<f32>,
    pub memory_total: u64,             // 总内存字节数
    pub memory_available: u64,         // 可用内存字节数
    pub memory_p_data: String,
    pub memory_v_data: String,
    pub disk_read: f64,                // 字节/秒
    pub disk_write: f64,
    pub net_received: f64,
    pub net_sent: f64,
    pub boot_time: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,      // 数据获取时间
}

impl Default for SystemStats {
    #[inline]
    fn default() -> Self {
        Self {
            system_type: "未知系统".to_string(),
            processor_count: 0,
            cpu_load: 0.0,
            cpu_temperature: Probe::Unsupported,
            memory_total: 0,
            memory_available: 0,
            memory_p_data: String::new(),
            memory_v_data: String::new(),
            disk_read: 0.0,
            disk_write: 0.0,
            net_received: 0.0,
            net_sent: 0.0,
            boot_time: None,
            timestamp: Utc::now(),
        }
    }
}

impl SystemStats {
    pub fn memory_used(&self) -> u64 {
        self.memory_total.saturating_sub(self.memory_available)
    }
}
