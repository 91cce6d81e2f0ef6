//! Linux 平台实现：读取 /proc 与 /sys

use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use super::{Capability, Platform};
use crate::counter::{CounterKey, CounterSource};
use crate::error::{MetricError, Probe, Result};
use crate::stats::{BiosInfo, CpuInfo, DiskInfo};

const PROC_STAT: &str = "/proc/stat";
const PROC_MEMINFO: &str = "/proc/meminfo";
const PROC_CPUINFO: &str = "/proc/cpuinfo";
const PROC_DISKSTATS: &str = "/proc/diskstats";
const PROC_NET_DEV: &str = "/proc/net/dev";
const PROC_FIB_TRIE: &str = "/proc/net/fib_trie";
const PROC_IF_INET6: &str = "/proc/net/if_inet6";
const SYS_BLOCK: &str = "/sys/block";
const SYS_NET: &str = "/sys/class/net";
const SYS_THERMAL: &str = "/sys/class/thermal";
const SYS_DMI: &str = "/sys/class/dmi/id";

/// /proc/diskstats 中的扇区固定为 512 字节
const SECTOR_SIZE: u64 = 512;

/// ESRCH：读取已退出进程的 /proc 文件
const NO_SUCH_PROCESS: i32 = 3;

/// 优先采用的 CPU 温区类型
const CPU_THERMAL_TYPES: [&str; 5] = ["x86_pkg_temp", "coretemp", "k10temp", "cpu-thermal", "acpitz"];

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Platform for LinuxPlatform {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::PerformanceCounters
            | Capability::SystemQuery
            | Capability::HardwareIds
            | Capability::Thermal => true,
            Capability::Windowing | Capability::SensorSharedMemory => false,
        }
    }

    fn open_counter(&self, key: &CounterKey) -> Result<Box<dyn CounterSource>> {
        let instance = key.instance.as_deref();
        let source: Box<dyn CounterSource> = match (key.category.as_str(), key.counter.as_str()) {
            ("Processor", "% Processor Time") => {
                let label = match instance {
                    None | Some("_Total") => "cpu".to_string(),
                    Some(n) if n.parse::<u32>().is_ok() => format!("cpu{n}"),
                    Some(_) => return Err(MetricError::UnknownCounter(key.to_string())),
                };
                Box::new(CpuTimeSource::new(label))
            }
            ("Memory", counter) => {
                let field = MemField::from_counter(counter)
                    .ok_or_else(|| MetricError::UnknownCounter(key.to_string()))?;
                Box::new(MeminfoSource { field })
            }
            ("PhysicalDisk", counter) => {
                let direction = match counter {
                    "Disk Read Bytes/sec" => Direction::Read,
                    "Disk Write Bytes/sec" => Direction::Write,
                    _ => return Err(MetricError::UnknownCounter(key.to_string())),
                };
                match instance {
                    None | Some("_Total") => {
                        let devices = whole_disks()?;
                        Box::new(RateSource::new(move || {
                            let content = std::fs::read_to_string(PROC_DISKSTATS)?;
                            Ok(disk_bytes(&parse_diskstats(&content), &devices, direction))
                        }))
                    }
                    Some(device) => {
                        let device = device.to_string();
                        let content = std::fs::read_to_string(PROC_DISKSTATS)?;
                        device_bytes(&parse_diskstats(&content), &device, direction)?;
                        Box::new(RateSource::new(move || {
                            let content = std::fs::read_to_string(PROC_DISKSTATS)?;
                            device_bytes(&parse_diskstats(&content), &device, direction)
                        }))
                    }
                }
            }
            ("Network Interface", counter) => {
                let direction = match counter {
                    "Bytes Received/sec" => Direction::Read,
                    "Bytes Sent/sec" => Direction::Write,
                    _ => return Err(MetricError::UnknownCounter(key.to_string())),
                };
                let interface = instance
                    .ok_or_else(|| MetricError::UnknownCounter(key.to_string()))?
                    .to_string();
                let content = std::fs::read_to_string(PROC_NET_DEV)?;
                interface_bytes(&parse_net_dev(&content), &interface, direction)?;
                Box::new(RateSource::new(move || {
                    let content = std::fs::read_to_string(PROC_NET_DEV)?;
                    interface_bytes(&parse_net_dev(&content), &interface, direction)
                }))
            }
            ("Process", counter) => {
                // None 表示 CPU 时间，其余为 status 中的内存字段
                let field = match counter {
                    "% Processor Time" => None,
                    "Working Set" => Some("VmRSS:"),
                    "Working Set - Private" => Some("RssAnon:"),
                    _ => return Err(MetricError::UnknownCounter(key.to_string())),
                };
                let pid = instance.unwrap_or_default();
                let dir = process_dir(pid)?;
                match field {
                    None => Box::new(ProcessCpuSource::new(pid, dir)),
                    Some(field) => Box::new(ProcessMemorySource::new(pid, dir, field)),
                }
            }
            _ => return Err(MetricError::UnknownCounter(key.to_string())),
        };
        debug!("已打开 Linux 计数器: {key}");
        Ok(source)
    }

    fn process_instance(&self, pid: u32) -> Result<String> {
        let pid = pid.to_string();
        process_dir(&pid)?;
        Ok(pid)
    }

    fn total_physical_memory(&self) -> Result<u64> {
        let content = std::fs::read_to_string(PROC_MEMINFO)?;
        Ok(parse_meminfo(&content).total)
    }

    fn cpu_count(&self) -> Result<usize> {
        let content = std::fs::read_to_string(PROC_CPUINFO)?;
        Ok(parse_cpuinfo(&content, None).len())
    }

    fn cpu_info(&self) -> Result<Vec<CpuInfo>> {
        let content = std::fs::read_to_string(PROC_CPUINFO)?;
        let max_mhz = read_optional("/sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq")?
            .and_then(|khz| khz.parse::<u32>().ok())
            .map(|khz| khz / 1000);
        Ok(parse_cpuinfo(&content, max_mhz))
    }

    fn cpu_temperature(&self) -> Result<Probe<f32>> {
        let entries = match std::fs::read_dir(SYS_THERMAL) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Probe::Absent),
            Err(e) => return Err(e.into()),
        };

        let mut zones = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("thermal_zone") {
                continue;
            }
            let zone_type = read_optional(entry.path().join("type"))?.unwrap_or_default();
            zones.push((name, zone_type));
        }
        zones.sort();

        let preferred = CPU_THERMAL_TYPES
            .iter()
            .find_map(|wanted| zones.iter().find(|(_, t)| t.as_str() == *wanted))
            .or_else(|| zones.first());

        let Some((zone, _)) = preferred else {
            return Ok(Probe::Absent);
        };
        match read_optional(Path::new(SYS_THERMAL).join(zone).join("temp"))? {
            Some(raw) => Ok(Probe::Value(parse_millidegrees(&raw)?)),
            None => Ok(Probe::Absent),
        }
    }

    fn disk_info(&self) -> Result<Vec<DiskInfo>> {
        let mut disks = Vec::new();
        for (index, name) in whole_disks()?.into_iter().enumerate() {
            let base = Path::new(SYS_BLOCK).join(&name);
            let sectors = read_optional(base.join("size"))?
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            let removable = read_optional(base.join("removable"))?.as_deref() == Some("1");
            disks.push(DiskInfo {
                index: index as u32,
                model: read_optional(base.join("device/model"))?.unwrap_or_default(),
                media_type: if removable {
                    "Removable Media".to_string()
                } else {
                    "Fixed hard disk media".to_string()
                },
                serial_number: read_optional(base.join("device/serial"))?.unwrap_or_default(),
                total: sectors * SECTOR_SIZE,
            });
        }
        Ok(disks)
    }

    fn network_instances(&self) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(PROC_NET_DEV)?;
        let mut names: Vec<String> = parse_net_dev(&content)
            .into_keys()
            .filter(|name| name != "lo")
            .collect();
        names.sort();
        Ok(names)
    }

    /// IPv4 地址取自本地路由表，接口停用后其本地路由随之删除；
    /// IPv6 地址按接口过滤，只保留 operstate 为 up 的接口
    fn local_ips(&self) -> Result<Vec<IpAddr>> {
        let mut addresses: Vec<IpAddr> = match read_optional(PROC_FIB_TRIE)? {
            Some(content) => parse_fib_trie(&content).into_iter().map(IpAddr::V4).collect(),
            None => Vec::new(),
        };
        if let Some(content) = read_optional(PROC_IF_INET6)? {
            for (interface, address) in parse_if_inet6(&content) {
                let operstate = read_optional(Path::new(SYS_NET).join(&interface).join("operstate"))?;
                if operstate.as_deref() == Some("up") {
                    addresses.push(IpAddr::V6(address));
                }
            }
        }
        Ok(addresses)
    }

    fn mac_addresses(&self) -> Result<Vec<String>> {
        let mut interfaces: Vec<String> = std::fs::read_dir(SYS_NET)?
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name != "lo")
            .collect();
        interfaces.sort();

        let mut addresses = Vec::new();
        for name in interfaces {
            let base = Path::new(SYS_NET).join(&name);
            if read_optional(base.join("operstate"))?.as_deref() != Some("up") {
                continue;
            }
            if let Some(address) = read_optional(base.join("address"))? {
                if !address.is_empty() && address != "00:00:00:00:00:00" {
                    addresses.push(address);
                }
            }
        }
        Ok(addresses)
    }

    fn boot_time(&self) -> Result<DateTime<Utc>> {
        let content = std::fs::read_to_string(PROC_STAT)?;
        let btime = parse_boot_time(&content)?;
        DateTime::from_timestamp(btime, 0)
            .ok_or_else(|| MetricError::Parse(format!("无效的开机时间戳: {btime}")))
    }

    fn system_type(&self) -> Result<String> {
        Ok(format!("{}-based PC", std::env::consts::ARCH))
    }

    fn bios_serial_number(&self) -> Result<String> {
        Ok(read_optional(Path::new(SYS_DMI).join("product_serial"))?.unwrap_or_default())
    }

    fn board_info(&self) -> Result<BiosInfo> {
        let dmi = Path::new(SYS_DMI);
        let board_name = read_optional(dmi.join("board_name"))?.unwrap_or_default();
        let product = read_optional(dmi.join("product_name"))?
            .unwrap_or_default()
            .replace("System Product Name", "");
        let model = if product.trim().is_empty() {
            board_name
        } else {
            product.trim().to_string()
        };

        Ok(BiosInfo {
            manufacturer: read_optional(dmi.join("board_vendor"))?.unwrap_or_default(),
            // 序列号通常仅 root 可读，读不到时留空
            id: read_optional(dmi.join("board_serial"))
                .unwrap_or_default()
                .unwrap_or_default(),
            model,
            serial_number: String::new(),
            guid: read_optional("/etc/machine-id")?.unwrap_or_default(),
            uuid: read_optional(dmi.join("product_uuid"))
                .unwrap_or_default()
                .map(|u| u.trim_matches(['{', '}']).to_uppercase())
                .unwrap_or_default(),
        })
    }
}

/// 读取并去除首尾空白；文件不存在时返回 None，无权限时返回 PermissionDenied
fn read_optional(path: impl AsRef<Path>) -> Result<Option<String>> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw.trim().to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(MetricError::PermissionDenied(
            path.display().to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

/// /sys/block 中的物理磁盘，排除 loop、ram、zram 等虚拟设备
fn whole_disks() -> Result<Vec<String>> {
    let mut disks: Vec<String> = std::fs::read_dir(SYS_BLOCK)?
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| is_physical_disk(name))
        .collect();
    disks.sort();
    Ok(disks)
}

fn is_physical_disk(name: &str) -> bool {
    !["loop", "ram", "zram", "dm-", "sr", "fd", "md"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// CPU 时间统计（单位：jiffies）
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// 解析 /proc/stat 中指定标签（`cpu`、`cpu0` ...）的一行
///
/// 空闲时间包含 iowait；guest 时间已计入 user，不重复累加。
pub(crate) fn parse_cpu_times(content: &str, label: &str) -> Result<CpuTimes> {
    let line = content
        .lines()
        .find(|line| line.split_whitespace().next() == Some(label))
        .ok_or_else(|| MetricError::Parse(format!("/proc/stat 中没有 {label}")))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|v| v.parse().unwrap_or(0))
        .collect();
    let field = |i: usize| fields.get(i).copied().unwrap_or(0);

    Ok(CpuTimes {
        idle: field(3) + field(4),
        total: fields.iter().sum(),
    })
}

/// /proc/stat 中 `cpuN` 行的数量，即在线逻辑处理器数
pub(crate) fn count_cpu_lines(content: &str) -> u64 {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|label| {
            label
                .strip_prefix("cpu")
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        })
        .count() as u64
}

/// 通过两次 /proc/stat 之间的增量计算 CPU 使用率（百分比）
///
/// 第一次采样没有基准，返回 0。
struct CpuTimeSource {
    label: String,
    previous: Option<CpuTimes>,
}

impl CpuTimeSource {
    fn new(label: String) -> Self {
        Self {
            label,
            previous: None,
        }
    }

    fn advance(&mut self, current: CpuTimes) -> f64 {
        let Some(previous) = self.previous.replace(current) else {
            return 0.0;
        };

        let total_diff = current.total.saturating_sub(previous.total);
        let idle_diff = current.idle.saturating_sub(previous.idle);
        if total_diff == 0 {
            return 0.0;
        }

        let usage = 1.0 - (idle_diff as f64 / total_diff as f64);
        (usage * 100.0).clamp(0.0, 100.0)
    }
}

impl CounterSource for CpuTimeSource {
    fn next_value(&mut self) -> Result<f64> {
        let content = std::fs::read_to_string(PROC_STAT)?;
        let current = parse_cpu_times(&content, &self.label)?;
        Ok(self.advance(current))
    }
}

/// /proc/meminfo 中关心的字段（字节）
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct MemInfo {
    pub total: u64,
    pub available: u64,
    pub free: u64,
    pub committed: u64,
    pub commit_limit: u64,
}

pub(crate) fn parse_meminfo(content: &str) -> MemInfo {
    let mut info = MemInfo::default();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            let value = value.parse::<u64>().unwrap_or(0) * 1024; // kB 转换为字节

            match key {
                "MemTotal:" => info.total = value,
                "MemAvailable:" => info.available = value,
                "MemFree:" => info.free = value,
                "Committed_AS:" => info.committed = value,
                "CommitLimit:" => info.commit_limit = value,
                _ => {}
            }
        }
    }

    info
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum MemField {
    Available,
    Free,
    Committed,
    CommitLimit,
    CommittedPercent,
}

impl MemField {
    fn from_counter(counter: &str) -> Option<Self> {
        match counter {
            "Available Bytes" => Some(MemField::Available),
            "Free & Zero Page List Bytes" => Some(MemField::Free),
            "Committed Bytes" => Some(MemField::Committed),
            "Commit Limit" => Some(MemField::CommitLimit),
            "% Committed Bytes In Use" => Some(MemField::CommittedPercent),
            _ => None,
        }
    }

    fn pick(self, info: &MemInfo) -> f64 {
        match self {
            MemField::Available => info.available as f64,
            MemField::Free => info.free as f64,
            MemField::Committed => info.committed as f64,
            MemField::CommitLimit => info.commit_limit as f64,
            MemField::CommittedPercent if info.commit_limit == 0 => 0.0,
            MemField::CommittedPercent => info.committed as f64 / info.commit_limit as f64 * 100.0,
        }
    }
}

/// 内存计数器是瞬时值，没有"首次采样"问题
struct MeminfoSource {
    field: MemField,
}

impl CounterSource for MeminfoSource {
    fn next_value(&mut self) -> Result<f64> {
        let content = std::fs::read_to_string(PROC_MEMINFO)?;
        Ok(self.field.pick(&parse_meminfo(&content)))
    }
}

/// 进程在 /proc 下的目录；实例名必须是仍在运行的进程号
fn process_dir(pid: &str) -> Result<PathBuf> {
    if pid.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MetricError::MissingInstance(format!("进程 {pid}")));
    }
    let dir = Path::new("/proc").join(pid);
    if !dir.join("stat").exists() {
        return Err(MetricError::MissingInstance(format!("进程 {pid}")));
    }
    Ok(dir)
}

/// 读取进程文件；进程已退出时返回 MissingInstance
fn read_process_file(path: &Path, pid: &str) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == ErrorKind::NotFound || e.raw_os_error() == Some(NO_SUCH_PROCESS) => {
            Err(MetricError::MissingInstance(format!("进程 {pid}")))
        }
        Err(e) => Err(e.into()),
    }
}

/// /proc/<pid>/stat 中的 utime + stime（jiffies）
///
/// 进程名可能包含空格和括号，字段从最后一个 `)` 之后开始计数。
pub(crate) fn parse_process_ticks(content: &str) -> Result<u64> {
    let rest = content
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| MetricError::Parse("无效的进程 stat".to_string()))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // state ppid pgrp session tty_nr tpgid flags minflt cminflt majflt cmajflt utime stime
    let tick = |i: usize| -> Result<u64> {
        fields
            .get(i)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| MetricError::Parse(format!("进程 stat 缺少第 {i} 个字段")))
    };
    Ok(tick(11)? + tick(12)?)
}

/// 进程 CPU 时间占用，口径与 Windows `Process\% Processor Time` 一致：
/// 各核心占用之和，满载时为 100 × 逻辑处理器数
struct ProcessCpuSource {
    pid: String,
    stat: PathBuf,
    previous: Option<(u64, u64)>,
}

impl ProcessCpuSource {
    fn new(pid: &str, dir: PathBuf) -> Self {
        Self {
            pid: pid.to_string(),
            stat: dir.join("stat"),
            previous: None,
        }
    }

    /// `current` 为（进程 jiffies, 全部 CPU 的 jiffies）
    fn advance(&mut self, current: (u64, u64), cpus: u64) -> f64 {
        let Some(previous) = self.previous.replace(current) else {
            return 0.0;
        };
        let process_diff = current.0.saturating_sub(previous.0);
        let total_diff = current.1.saturating_sub(previous.1);
        if total_diff == 0 {
            return 0.0;
        }
        let cpus = cpus.max(1) as f64;
        (process_diff as f64 / total_diff as f64 * 100.0 * cpus).clamp(0.0, 100.0 * cpus)
    }
}

impl CounterSource for ProcessCpuSource {
    fn next_value(&mut self) -> Result<f64> {
        let ticks = parse_process_ticks(&read_process_file(&self.stat, &self.pid)?)?;
        let system = std::fs::read_to_string(PROC_STAT)?;
        let total = parse_cpu_times(&system, "cpu")?.total;
        Ok(self.advance((ticks, total), count_cpu_lines(&system)))
    }
}

/// /proc/<pid>/status 中以 kB 为单位的字段，转换为字节；字段缺失时为 None
pub(crate) fn parse_status_bytes(content: &str, field: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix(field))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// 进程驻留内存；内核线程没有这些字段，读数为 0
struct ProcessMemorySource {
    pid: String,
    status: PathBuf,
    field: &'static str,
}

impl ProcessMemorySource {
    fn new(pid: &str, dir: PathBuf, field: &'static str) -> Self {
        Self {
            pid: pid.to_string(),
            status: dir.join("status"),
            field,
        }
    }
}

impl CounterSource for ProcessMemorySource {
    fn next_value(&mut self) -> Result<f64> {
        let content = read_process_file(&self.status, &self.pid)?;
        Ok(parse_status_bytes(&content, self.field).unwrap_or(0) as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Direction {
    Read,
    Write,
}

/// 由单调递增的累计值计算每秒速率，第一次采样返回 0
struct RateSource<F> {
    read: F,
    previous: Option<(u64, Instant)>,
}

impl<F> RateSource<F>
where
    F: FnMut() -> Result<u64> + Send,
{
    fn new(read: F) -> Self {
        Self {
            read,
            previous: None,
        }
    }
}

/// 两次累计值之间的每秒速率；计数回绕时按 0 处理
fn rate_between(previous: (u64, Instant), current: (u64, Instant)) -> f64 {
    let elapsed = current.1.duration_since(previous.1).as_secs_f64();
    if elapsed <= 0.0 {
        return 0.0;
    }
    current.0.saturating_sub(previous.0) as f64 / elapsed
}

impl<F> CounterSource for RateSource<F>
where
    F: FnMut() -> Result<u64> + Send,
{
    fn next_value(&mut self) -> Result<f64> {
        let current = ((self.read)()?, Instant::now());
        Ok(match self.previous.replace(current) {
            Some(previous) => rate_between(previous, current),
            None => 0.0,
        })
    }
}

/// /proc/diskstats 中单个设备的累计扇区数
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct DiskStat {
    pub sectors_read: u64,
    pub sectors_written: u64,
}

pub(crate) fn parse_diskstats(content: &str) -> HashMap<String, DiskStat> {
    let mut stats = HashMap::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // major minor name reads merged sectors_read ms writes merged sectors_written ...
        if fields.len() < 10 {
            continue;
        }
        stats.insert(
            fields[2].to_string(),
            DiskStat {
                sectors_read: fields[5].parse().unwrap_or(0),
                sectors_written: fields[9].parse().unwrap_or(0),
            },
        );
    }
    stats
}

/// 多个设备的累计字节数之和，已移除的设备不计入
fn disk_bytes(stats: &HashMap<String, DiskStat>, devices: &[String], direction: Direction) -> u64 {
    devices
        .iter()
        .filter_map(|device| stats.get(device))
        .map(|stat| match direction {
            Direction::Read => stat.sectors_read,
            Direction::Write => stat.sectors_written,
        })
        .sum::<u64>()
        * SECTOR_SIZE
}

/// 单个设备的累计字节数；设备不存在时返回 MissingInstance
fn device_bytes(stats: &HashMap<String, DiskStat>, device: &str, direction: Direction) -> Result<u64> {
    let stat = stats
        .get(device)
        .ok_or_else(|| MetricError::MissingInstance(format!("磁盘 {device}")))?;
    Ok(match direction {
        Direction::Read => stat.sectors_read,
        Direction::Write => stat.sectors_written,
    } * SECTOR_SIZE)
}

/// 单个网卡的累计字节数；网卡不存在时返回 MissingInstance
fn interface_bytes(
    stats: &HashMap<String, (u64, u64)>,
    interface: &str,
    direction: Direction,
) -> Result<u64> {
    let (rx, tx) = stats
        .get(interface)
        .copied()
        .ok_or_else(|| MetricError::MissingInstance(format!("网络接口 {interface}")))?;
    Ok(match direction {
        Direction::Read => rx,
        Direction::Write => tx,
    })
}

/// 解析 /proc/net/dev，返回 接口名 -> (接收字节, 发送字节)
pub(crate) fn parse_net_dev(content: &str) -> HashMap<String, (u64, u64)> {
    let mut stats = HashMap::new();
    for line in content.lines() {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<u64> = counters
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        // 接收 8 列，随后发送 8 列
        if fields.len() < 9 {
            continue;
        }
        stats.insert(name.trim().to_string(), (fields[0], fields[8]));
    }
    stats
}

/// 从 /proc/net/fib_trie 中取出本机 IPv4 地址（`/32 host LOCAL` 条目），排除回环
pub(crate) fn parse_fib_trie(content: &str) -> Vec<Ipv4Addr> {
    let mut addresses = Vec::new();
    let mut last = None;
    for line in content.lines() {
        let line = line.trim();
        if let Some(address) = line.strip_prefix("|-- ") {
            last = address.parse::<Ipv4Addr>().ok();
        } else if line.ends_with("host LOCAL") {
            if let Some(address) = last.take() {
                if !address.is_loopback() && !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
        }
    }
    addresses
}

/// 解析 /proc/net/if_inet6，返回（接口名, 地址），排除回环接口
pub(crate) fn parse_if_inet6(content: &str) -> Vec<(String, Ipv6Addr)> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (hex, interface) = (fields.first()?, fields.get(5)?);
            let address = Ipv6Addr::from(u128::from_str_radix(hex, 16).ok()?);
            (*interface != "lo" && !address.is_loopback()).then(|| (interface.to_string(), address))
        })
        .collect()
}

/// 解析 /proc/cpuinfo，每个物理封装（physical id）生成一条记录
pub(crate) fn parse_cpuinfo(content: &str, max_mhz: Option<u32>) -> Vec<CpuInfo> {
    let mut packages: Vec<(String, CpuInfo)> = Vec::new();
    let mut logical: HashMap<String, u32> = HashMap::new();

    for block in content.split("\n\n").filter(|b| !b.trim().is_empty()) {
        let fields: HashMap<&str, &str> = block
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        if !fields.contains_key("processor") {
            continue;
        }

        let package = fields.get("physical id").copied().unwrap_or("0").to_string();
        *logical.entry(package.clone()).or_insert(0) += 1;
        if packages.iter().any(|(id, _)| *id == package) {
            continue;
        }

        let flags: BTreeSet<&str> = fields
            .get("flags")
            .map(|f| f.split_whitespace().collect())
            .unwrap_or_default();
        let cores = fields
            .get("cpu cores")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        packages.push((
            package.clone(),
            CpuInfo {
                device_id: format!("CPU{package}"),
                name: fields.get("model name").copied().unwrap_or_default().to_string(),
                manufacturer: fields.get("vendor_id").copied().unwrap_or_default().to_string(),
                current_clock_speed: fields
                    .get("cpu MHz")
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(|mhz| mhz.round() as u32),
                max_clock_speed: max_mhz,
                data_width: if flags.is_empty() {
                    None
                } else if flags.contains("lm") {
                    Some(64)
                } else {
                    Some(32)
                },
                serial_number: fields.get("Serial").map(|s| s.to_string()),
                number_of_cores: cores,
                number_of_logical_processors: 0,
            },
        ));
    }

    packages
        .into_iter()
        .map(|(id, mut info)| {
            info.number_of_logical_processors = logical.get(&id).copied().unwrap_or(0);
            info
        })
        .collect()
}

pub(crate) fn parse_boot_time(content: &str) -> Result<i64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| MetricError::Parse("/proc/stat 中没有 btime".to_string()))
}

/// 温区读数为千分之一摄氏度，保留两位小数
pub(crate) fn parse_millidegrees(raw: &str) -> Result<f32> {
    let milli: i64 = raw
        .trim()
        .parse()
        .map_err(|_| MetricError::Parse(format!("无效的温度读数: {raw}")))?;
    let celsius = milli as f64 / 1000.0;
    if !(-50.0..=150.0).contains(&celsius) {
        warn!("温度读数超出合理范围: {celsius}");
    }
    Ok(((celsius * 100.0).round() / 100.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const STAT: &str = "cpu  1234 567 890 1234 100 0 0 0 0 0\n\
        cpu0 600 200 400 600 50 0 0 0 0 0\n\
        intr 123456\n\
        btime 1700000000\n";

    const MEMINFO: &str = "MemTotal:       16384000 kB\n\
        MemFree:         1024000 kB\n\
        MemAvailable:    4096000 kB\n\
        Cached:          2048000 kB\n\
        CommitLimit:    16000000 kB\n\
        Committed_AS:    8000000 kB\n";

    const NET_DEV: &str = "Inter-|   Receive                                                |  Transmit\n \
        face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    \
        lo: 1000 10 0 0 0 0 0 0 1000 10 0 0 0 0 0 0\n  \
        eth0: 5000 50 0 0 0 0 0 0 7000 70 0 0 0 0 0 0\n";

    const DISKSTATS: &str = "   8       0 sda 100 0 2000 10 50 0 4000 20 0 30 30\n\
        \x20  8       1 sda1 90 0 1800 9 45 0 3600 18 0 27 27\n\
        \x20  7       0 loop0 5 0 10 0 0 0 0 0 0 0 0\n";

    const CPUINFO: &str = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Core(TM) i7\n\
        cpu MHz\t\t: 2893.204\nphysical id\t: 0\ncpu cores\t: 2\nflags\t\t: fpu lm sse\n\n\
        processor\t: 1\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Core(TM) i7\n\
        cpu MHz\t\t: 2900.000\nphysical id\t: 0\ncpu cores\t: 2\nflags\t\t: fpu lm sse\n\n";

    #[test]
    fn test_parse_cpu_times_total() {
        let times = parse_cpu_times(STAT, "cpu").unwrap();
        assert_eq!(times.idle, 1234 + 100);
        assert_eq!(times.total, 1234 + 567 + 890 + 1234 + 100);
    }

    #[test]
    fn test_parse_cpu_times_single_core() {
        let times = parse_cpu_times(STAT, "cpu0").unwrap();
        assert_eq!(times.idle, 650);
        assert_eq!(times.total, 1850);
        assert_eq!(count_cpu_lines(STAT), 1);
        assert_eq!(count_cpu_lines("cpu 1 2\ncpu0 1\ncpu1 1\ncpufreq 3\n"), 2);
    }

    #[test]
    fn test_parse_cpu_times_invalid() {
        assert!(parse_cpu_times("", "cpu").is_err());
        assert!(parse_cpu_times(STAT, "cpu7").is_err());

        let truncated = parse_cpu_times("cpu 10 x", "cpu").unwrap();
        assert_eq!(truncated.idle, 0);
        assert_eq!(truncated.total, 10);
    }

    #[test]
    fn test_cpu_time_source_first_sample_zero() {
        let mut source = CpuTimeSource::new("cpu".to_string());
        let first = CpuTimes {
            idle: 100,
            total: 200,
            ..Default::default()
        };
        let second = CpuTimes {
            idle: 150,
            total: 400,
            ..Default::default()
        };
        assert_eq!(source.advance(first), 0.0);
        assert_eq!(source.advance(second), 75.0);
        // 没有新的时间片时返回 0
        assert_eq!(source.advance(second), 0.0);
    }

    #[test]
    fn test_parse_meminfo() {
        let info = parse_meminfo(MEMINFO);
        assert_eq!(info.total, 16384000 * 1024);
        assert_eq!(info.available, 4096000 * 1024);
        assert_eq!(info.free, 1024000 * 1024);
        assert_eq!(info.committed, 8000000 * 1024);
        assert_eq!(info.commit_limit, 16000000 * 1024);

        assert_eq!(MemField::CommittedPercent.pick(&info), 50.0);
        assert_eq!(
            MemField::from_counter("Free & Zero Page List Bytes").map(|f| f.pick(&info)),
            Some((1024000 * 1024) as f64)
        );
        assert_eq!(MemField::CommittedPercent.pick(&MemInfo::default()), 0.0);
        assert_eq!(parse_meminfo(""), MemInfo::default());
    }

    #[test]
    fn test_parse_net_dev() {
        let stats = parse_net_dev(NET_DEV);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["eth0"], (5000, 7000));
        assert_eq!(stats["lo"], (1000, 1000));
        assert!(parse_net_dev("eth0: 1 2 3").is_empty());
    }

    #[test]
    fn test_parse_diskstats_and_total() {
        let stats = parse_diskstats(DISKSTATS);
        assert_eq!(stats["sda"].sectors_read, 2000);
        assert_eq!(stats["sda"].sectors_written, 4000);
        assert_eq!(stats["loop0"].sectors_read, 10);

        let devices = vec!["sda".to_string(), "missing".to_string()];
        assert_eq!(disk_bytes(&stats, &devices, Direction::Read), 2000 * 512);
        assert_eq!(disk_bytes(&stats, &devices, Direction::Write), 4000 * 512);

        assert_eq!(device_bytes(&stats, "sda1", Direction::Read).unwrap(), 1800 * 512);
        assert!(matches!(
            device_bytes(&stats, "no_such_disk_xyz", Direction::Read),
            Err(MetricError::MissingInstance(_))
        ));
    }

    #[test]
    fn test_vanished_interface_is_missing_instance() {
        let stats = parse_net_dev(NET_DEV);
        assert_eq!(interface_bytes(&stats, "eth0", Direction::Write).unwrap(), 7000);
        assert!(matches!(
            interface_bytes(&stats, "veth_gone0", Direction::Read),
            Err(MetricError::MissingInstance(_))
        ));
    }

    #[test]
    fn test_unknown_disk_and_interface_rejected() {
        let platform = LinuxPlatform::new();
        let disk = CounterKey::new("PhysicalDisk", "Disk Read Bytes/sec", Some("no_such_disk_xyz"));
        let net = CounterKey::network("Bytes Received/sec", "veth_gone0");
        for key in [disk, net] {
            match platform.open_counter(&key) {
                Err(MetricError::MissingInstance(_)) => {}
                // 没有 /proc 的环境
                Err(MetricError::Io(e)) => println!("读取 /proc 失败: {e}"),
                other => panic!("{key} 应被拒绝: {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_parse_process_ticks() {
        let stat = "4242 (my (odd) app) S 1 4242 4242 0 -1 4194560 500 0 0 0 120 30 0 0 20 0 4 0 100 0 0\n";
        assert_eq!(parse_process_ticks(stat).unwrap(), 150);
        assert!(parse_process_ticks("4242 (short) S 1 2").is_err());
        assert!(parse_process_ticks("garbage").is_err());
    }

    #[test]
    fn test_process_cpu_source_scaled_to_cores() {
        let mut source = ProcessCpuSource::new("1", PathBuf::from("/proc/1"));
        assert_eq!(source.advance((100, 10_000), 4), 0.0);
        // 全部 CPU 走了 400 jiffies，进程用了 200：两个核心跑满
        assert_eq!(source.advance((300, 10_400), 4), 200.0);
        assert_eq!(source.advance((300, 10_400), 4), 0.0);
    }

    #[test]
    fn test_parse_status_bytes() {
        let status = "Name:\tcat\nVmRSS:\t    2048 kB\nRssAnon:\t     512 kB\n";
        assert_eq!(parse_status_bytes(status, "VmRSS:"), Some(2048 * 1024));
        assert_eq!(parse_status_bytes(status, "RssAnon:"), Some(512 * 1024));
        assert_eq!(parse_status_bytes("Name:\tkthreadd\n", "VmRSS:"), None);
    }

    #[test]
    fn test_process_counters_for_current_process() {
        let platform = LinuxPlatform::new();
        let pid = std::process::id();
        let Ok(instance) = platform.process_instance(pid) else {
            println!("当前环境没有 /proc");
            return;
        };
        assert_eq!(instance, pid.to_string());

        let mut memory = platform
            .open_counter(&CounterKey::process("Working Set", &instance))
            .unwrap();
        assert!(memory.next_value().unwrap() > 0.0);

        let mut cpu = platform
            .open_counter(&CounterKey::process("% Processor Time", &instance))
            .unwrap();
        assert_eq!(cpu.next_value().unwrap(), 0.0);
        assert!(cpu.next_value().unwrap() >= 0.0);

        assert!(matches!(
            platform.process_instance(u32::MAX),
            Err(MetricError::MissingInstance(_))
        ));
        assert!(matches!(
            platform.open_counter(&CounterKey::process("Working Set", "chrome")),
            Err(MetricError::MissingInstance(_))
        ));
    }

    #[test]
    fn test_parse_fib_trie() {
        let trie = "Main:\n  +-- 0.0.0.0/0 3 0 5\n     |-- 0.0.0.0\n        /0 universe UNICAST\n\
            \x20    +-- 127.0.0.0/8 2 0 2\n        |-- 127.0.0.1\n           /32 host LOCAL\n\
            \x20    |-- 192.168.1.10\n        /32 host LOCAL\n\
            \x20    |-- 192.168.1.255\n        /32 link BROADCAST\n\
            Local:\n     |-- 192.168.1.10\n        /32 host LOCAL\n";
        assert_eq!(parse_fib_trie(trie), vec![Ipv4Addr::new(192, 168, 1, 10)]);
        assert!(parse_fib_trie("").is_empty());
    }

    #[test]
    fn test_parse_if_inet6() {
        let content = "fe800000000000000000000000000001 02 40 20 80     eth0\n\
            00000000000000000000000000000001 01 80 10 80       lo\n";
        let parsed = parse_if_inet6(content);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "eth0");
        assert_eq!(parsed[0].1, "fe80::1".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_physical_disk_filter() {
        assert!(is_physical_disk("sda"));
        assert!(is_physical_disk("nvme0n1"));
        assert!(!is_physical_disk("loop3"));
        assert!(!is_physical_disk("zram0"));
        assert!(!is_physical_disk("dm-1"));
    }

    #[test]
    fn test_rate_between() {
        let start = Instant::now();
        let later = start + Duration::from_secs(2);
        assert_eq!(rate_between((1000, start), (5000, later)), 2000.0);
        // 计数回绕
        assert_eq!(rate_between((5000, start), (1000, later)), 0.0);
        assert_eq!(rate_between((0, start), (100, start)), 0.0);
    }

    #[test]
    fn test_rate_source_first_sample_zero() {
        let mut value = 0u64;
        let mut source = RateSource::new(move || {
            value += 4096;
            Ok(value)
        });
        assert_eq!(source.next_value().unwrap(), 0.0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(source.next_value().unwrap() > 0.0);
    }

    #[test]
    fn test_parse_cpuinfo() {
        let cpus = parse_cpuinfo(CPUINFO, Some(4700));
        assert_eq!(cpus.len(), 1);
        let cpu = &cpus[0];
        assert_eq!(cpu.device_id, "CPU0");
        assert_eq!(cpu.manufacturer, "GenuineIntel");
        assert_eq!(cpu.name, "Intel(R) Core(TM) i7");
        assert_eq!(cpu.current_clock_speed, Some(2893));
        assert_eq!(cpu.max_clock_speed, Some(4700));
        assert_eq!(cpu.data_width, Some(64));
        assert_eq!(cpu.number_of_cores, 2);
        assert_eq!(cpu.number_of_logical_processors, 2);
        assert!(parse_cpuinfo("", None).is_empty());
    }

    #[test]
    fn test_parse_boot_time() {
        assert_eq!(parse_boot_time(STAT).unwrap(), 1_700_000_000);
        assert!(parse_boot_time("cpu 1 2 3").is_err());
    }

    #[test]
    fn test_parse_millidegrees() {
        assert_eq!(parse_millidegrees("41500\n").unwrap(), 41.5);
        assert_eq!(parse_millidegrees("38123").unwrap(), 38.12);
        assert!(parse_millidegrees("hot").is_err());
    }

    #[test]
    fn test_unknown_counter_rejected() {
        let platform = LinuxPlatform::new();
        let key = CounterKey::new("Processor", "% Idle Time", Some("_Total"));
        assert!(matches!(
            platform.open_counter(&key),
            Err(MetricError::UnknownCounter(_))
        ));
        let key = CounterKey::new("Network Interface", "Bytes Sent/sec", None);
        assert!(platform.open_counter(&key).is_err());
    }

    #[test]
    fn test_linux_cpu_counter() {
        // 在某些容器环境中 /proc 可能不可用
        let platform = LinuxPlatform::new();
        match platform.open_counter(&CounterKey::cpu_total()) {
            Ok(mut source) => {
                if let Ok(first) = source.next_value() {
                    assert_eq!(first, 0.0);
                }
                if let Ok(second) = source.next_value() {
                    assert!((0.0..=100.0).contains(&second));
                }
            }
            Err(e) => println!("打开 CPU 计数器失败: {e}"),
        }
    }

    #[test]
    fn test_linux_memory_queries() {
        let platform = LinuxPlatform::new();
        match platform.total_physical_memory() {
            Ok(total) => {
                assert!(total > 0);
                if let Ok(mut source) = platform.open_counter(&CounterKey::memory("Available Bytes")) {
                    let available = source.next_value().unwrap_or(0.0);
                    assert!(available <= total as f64);
                }
            }
            Err(e) => println!("获取内存信息失败: {e}"),
        }
    }
}
