//! 平台能力接口
//!
//! 每个平台实现一次 [`Platform`]，在启动时由 [`detect`] 选定，
//! 访问器不再在每次调用时判断"当前是否为 Windows"。
//! 所有查询方法都有返回 [`MetricError::Unsupported`] 的默认实现，
//! 平台只覆盖自己能回答的部分。

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::counter::{CounterKey, CounterSource};
use crate::error::{MetricError, Probe, Result};
use crate::stats::{BiosInfo, CpuInfo, DiskInfo};

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(windows)]
pub mod win32;

/// 平台可能提供的能力
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// 按（类别, 计数器, 实例）采样的瞬时计数器
    PerformanceCounters,
    /// 处理器、内存、磁盘、网卡、开机时间等结构化查询
    SystemQuery,
    /// BIOS/主板序列号、机器 GUID 等硬件标识
    HardwareIds,
    Thermal,
    /// 顶层窗口枚举
    Windowing,
    /// 第三方监控软件发布的共享内存传感器文档
    SensorSharedMemory,
}

pub trait Platform: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, capability: Capability) -> bool {
        let _ = capability;
        false
    }

    /// 打开一个计数器源；可能是昂贵的系统调用
    fn open_counter(&self, key: &CounterKey) -> Result<Box<dyn CounterSource>> {
        let _ = key;
        Err(MetricError::Unsupported("性能计数器"))
    }

    /// 进程号对应的 `Process` 计数器实例名；进程不存在时返回 [`MetricError::MissingInstance`]
    fn process_instance(&self, pid: u32) -> Result<String> {
        let _ = pid;
        Err(MetricError::Unsupported("性能计数器"))
    }

    /// 物理内存总量（字节）
    fn total_physical_memory(&self) -> Result<u64> {
        Err(MetricError::Unsupported("系统查询"))
    }

    /// 物理处理器（插槽）数量
    fn cpu_count(&self) -> Result<usize> {
        Err(MetricError::Unsupported("系统查询"))
    }

    fn cpu_info(&self) -> Result<Vec<CpuInfo>> {
        Err(MetricError::Unsupported("系统查询"))
    }

    fn cpu_temperature(&self) -> Result<Probe<f32>> {
        Ok(Probe::Unsupported)
    }

    fn disk_info(&self) -> Result<Vec<DiskInfo>> {
        Err(MetricError::Unsupported("系统查询"))
    }

    /// 网络接口计数器的实例名
    fn network_instances(&self) -> Result<Vec<String>> {
        Err(MetricError::Unsupported("系统查询"))
    }

    /// 处于启用状态的非回环网卡硬件地址
    fn mac_addresses(&self) -> Result<Vec<String>> {
        Err(MetricError::Unsupported("系统查询"))
    }

    /// 处于启用状态的非回环网卡上的全部单播地址
    fn local_ips(&self) -> Result<Vec<IpAddr>> {
        Err(MetricError::Unsupported("系统查询"))
    }

    /// 主网卡地址
    fn network_card_address(&self) -> Result<String> {
        Ok(self.mac_addresses()?.into_iter().next().unwrap_or_default())
    }

    fn boot_time(&self) -> Result<DateTime<Utc>> {
        Err(MetricError::Unsupported("系统查询"))
    }

    /// 系统类型描述，例如 `x64-based PC`
    fn system_type(&self) -> Result<String> {
        Ok(format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH))
    }

    fn bios_serial_number(&self) -> Result<String> {
        Err(MetricError::Unsupported("硬件标识"))
    }

    /// 主板信息；`serial_number` 由访问器层补齐
    fn board_info(&self) -> Result<BiosInfo> {
        Err(MetricError::Unsupported("硬件标识"))
    }

    fn open_window_titles(&self) -> Result<Vec<String>> {
        Err(MetricError::Unsupported("窗口枚举"))
    }

    /// 读取共享内存传感器文档；监控软件未运行时返回 `None`
    fn sensor_document(&self) -> Result<Option<String>> {
        Err(MetricError::Unsupported("共享内存传感器"))
    }
}

/// 不支持的平台：不提供任何能力，所有访问器返回默认值
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlatform;

impl Platform for NullPlatform {
    fn name(&self) -> &'static str {
        "unsupported"
    }
}

/// 选择当前目标平台的实现
pub fn detect() -> Arc<dyn Platform> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(linux::LinuxPlatform::new())
    }

    #[cfg(windows)]
    {
        Arc::new(win32::WindowsPlatform::new())
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    {
        Arc::new(NullPlatform)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 可控的假平台，用于访问器、上下文和服务器测试

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const TOTAL_MEMORY: u64 = 16 * 1024 * 1024 * 1024;
    pub const AVAILABLE_MEMORY: u64 = 4 * 1024 * 1024 * 1024;

    pub const FREE_MEMORY: u64 = 2 * 1024 * 1024 * 1024;
    pub const PROCESS_WORKING_SET: u64 = 64 * 1024 * 1024;
    pub const PROCESS_PRIVATE_BYTES: u64 = 32 * 1024 * 1024;
    /// 除当前进程外假平台认识的另一个进程
    pub const OTHER_PID: u32 = 4242;
    /// 出现在实例列表中、但采样时已不存在的网卡
    pub const VANISHED_INTERFACE: &str = "veth_gone0";

    pub const SENSOR_DOCUMENT: &str =
        "<temp><id>TCPU</id><label>CPU</label><value>41</value></temp>\
         <fan><id>FCPU</id><label>CPU Fan</label><value>1350</value></fan>";

    /// 第一次采样返回 0，之后返回固定值
    struct Scripted {
        value: f64,
        primed: bool,
    }

    impl CounterSource for Scripted {
        fn next_value(&mut self) -> Result<f64> {
            if !self.primed {
                self.primed = true;
                return Ok(0.0);
            }
            Ok(self.value)
        }
    }

    /// 始终返回固定值
    struct Constant(f64);

    impl CounterSource for Constant {
        fn next_value(&mut self) -> Result<f64> {
            Ok(self.0)
        }
    }

    /// 实例已消失的计数器
    struct Vanished(String);

    impl CounterSource for Vanished {
        fn next_value(&mut self) -> Result<f64> {
            Err(MetricError::MissingInstance(self.0.clone()))
        }
    }

    #[derive(Default)]
    pub struct FakePlatform {
        /// 昂贵查询（物理内存、BIOS 序列号等）的执行次数
        pub queries: AtomicUsize,
        /// 已打开的计数器数量
        pub opened: AtomicUsize,
        /// 接下来多少次查询以瞬时错误失败
        pub failures: AtomicUsize,
        /// 网卡实例列表是否包含 [`VANISHED_INTERFACE`]
        pub vanished_interface: bool,
    }

    impl FakePlatform {
        pub fn with_vanished_interface() -> Self {
            Self {
                vanished_interface: true,
                ..Self::default()
            }
        }

        pub fn failing(times: usize) -> Self {
            let platform = Self::default();
            platform.failures.store(times, Ordering::SeqCst);
            platform
        }

        fn query<T>(&self, value: T) -> Result<T> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(MetricError::Query("RPC 服务器不可用".to_string()));
            }
            Ok(value)
        }
    }

    impl Platform for FakePlatform {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn supports(&self, _capability: Capability) -> bool {
            true
        }

        fn open_counter(&self, key: &CounterKey) -> Result<Box<dyn CounterSource>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if key.instance.as_deref() == Some(VANISHED_INTERFACE) {
                return Ok(Box::new(Vanished(VANISHED_INTERFACE.to_string())));
            }
            let source: Box<dyn CounterSource> =
                match (key.category.as_str(), key.counter.as_str()) {
                    ("Processor", "% Processor Time") => Box::new(Scripted {
                        value: 25.0,
                        primed: false,
                    }),
                    ("Memory", "Available Bytes") => Box::new(Constant(AVAILABLE_MEMORY as f64)),
                    ("Memory", "Committed Bytes") => Box::new(Constant(8.0 * 1024.0 * 1024.0 * 1024.0)),
                    ("Memory", "Commit Limit") => Box::new(Constant(16.0 * 1024.0 * 1024.0 * 1024.0)),
                    ("Memory", "% Committed Bytes In Use") => Box::new(Constant(50.0)),
                    ("Memory", "Free & Zero Page List Bytes") => Box::new(Constant(FREE_MEMORY as f64)),
                    ("PhysicalDisk", "Disk Read Bytes/sec") => Box::new(Constant(1000.0)),
                    ("PhysicalDisk", "Disk Write Bytes/sec") => Box::new(Constant(500.0)),
                    ("Network Interface", "Bytes Received/sec") => Box::new(Constant(100.0)),
                    ("Network Interface", "Bytes Sent/sec") => Box::new(Constant(50.0)),
                    // 相当于两个核心跑满
                    ("Process", "% Processor Time") => Box::new(Scripted {
                        value: 200.0,
                        primed: false,
                    }),
                    ("Process", "Working Set") => Box::new(Constant(PROCESS_WORKING_SET as f64)),
                    ("Process", "Working Set - Private") => {
                        Box::new(Constant(PROCESS_PRIVATE_BYTES as f64))
                    }
                    _ => return Err(MetricError::UnknownCounter(key.to_string())),
                };
            Ok(source)
        }

        fn process_instance(&self, pid: u32) -> Result<String> {
            if pid == std::process::id() || pid == OTHER_PID {
                Ok(pid.to_string())
            } else {
                Err(MetricError::MissingInstance(pid.to_string()))
            }
        }

        fn total_physical_memory(&self) -> Result<u64> {
            self.query(TOTAL_MEMORY)
        }

        fn cpu_count(&self) -> Result<usize> {
            self.query(1)
        }

        fn cpu_info(&self) -> Result<Vec<CpuInfo>> {
            self.query(vec![CpuInfo {
                device_id: "CPU0".to_string(),
                name: "Fake CPU @ 3.00GHz".to_string(),
                manufacturer: "GenuineFake".to_string(),
                current_clock_speed: Some(3000),
                max_clock_speed: Some(4200),
                data_width: Some(64),
                serial_number: None,
                number_of_cores: 4,
                number_of_logical_processors: 8,
            }])
        }

        fn cpu_temperature(&self) -> Result<Probe<f32>> {
            self.query(Probe::Value(41.5))
        }

        fn disk_info(&self) -> Result<Vec<DiskInfo>> {
            self.query(vec![
                DiskInfo {
                    index: 1,
                    model: "Data Disk".to_string(),
                    media_type: "Fixed hard disk media".to_string(),
                    serial_number: "D1".to_string(),
                    total: 2_000_000_000_000,
                },
                DiskInfo {
                    index: 0,
                    model: "System Disk".to_string(),
                    media_type: "Fixed hard disk media".to_string(),
                    serial_number: "D0".to_string(),
                    total: 500_000_000_000,
                },
            ])
        }

        fn network_instances(&self) -> Result<Vec<String>> {
            let mut instances = vec!["eth0".to_string(), "wlan0".to_string()];
            if self.vanished_interface {
                instances.push(VANISHED_INTERFACE.to_string());
            }
            self.query(instances)
        }

        fn local_ips(&self) -> Result<Vec<IpAddr>> {
            self.query(vec![
                IpAddr::from([192, 168, 1, 10]),
                IpAddr::from([0xfe80, 0, 0, 0, 0, 0, 0, 1]),
            ])
        }

        fn mac_addresses(&self) -> Result<Vec<String>> {
            self.query(vec!["00:11:22:33:44:55".to_string()])
        }

        fn boot_time(&self) -> Result<DateTime<Utc>> {
            self.query(DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default())
        }

        fn system_type(&self) -> Result<String> {
            self.query("x64-based PC".to_string())
        }

        fn bios_serial_number(&self) -> Result<String> {
            self.query("SN-42".to_string())
        }

        fn board_info(&self) -> Result<BiosInfo> {
            self.query(BiosInfo {
                manufacturer: "ASUSTeK".to_string(),
                id: "BOARD-1".to_string(),
                model: "PRIME Z790".to_string(),
                serial_number: String::new(),
                guid: "1b2c3d4e-0000-0000-0000-000000000000".to_string(),
                uuid: "ABCDEF01-2345-6789-ABCD-EF0123456789".to_string(),
            })
        }

        fn open_window_titles(&self) -> Result<Vec<String>> {
            self.query(vec!["Terminal".to_string(), "Editor".to_string()])
        }

        fn sensor_document(&self) -> Result<Option<String>> {
            self.query(Some(SENSOR_DOCUMENT.to_string()))
        }
    }
}
