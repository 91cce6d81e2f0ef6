//! Windows 平台：PDH 性能计数器、WMI 查询、注册表、窗口枚举和 AIDA64 共享内存

use std::collections::HashMap;
use std::ffi::c_void;
use std::net::IpAddr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use log::debug;
use windows::Win32::Foundation::{
    BOOL, CloseHandle, ERROR_MORE_DATA, ERROR_SUCCESS, HWND, LPARAM, TRUE,
};
use windows::Win32::System::Memory::{
    FILE_MAP_READ, MEMORY_BASIC_INFORMATION, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile,
    VirtualQuery,
};
use windows::Win32::System::Performance::{
    PDH_FMT_COUNTERVALUE, PDH_FMT_DOUBLE, PdhAddEnglishCounterW, PdhCloseQuery,
    PdhCollectQueryData, PdhGetFormattedCounterValue, PdhOpenQueryW,
};
use windows::Win32::System::Registry::{
    HKEY_LOCAL_MACHINE, RRF_RT_REG_SZ, RRF_SUBKEY_WOW6464KEY, RegGetValueW,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GWL_STYLE, GetWindowLongW, GetWindowTextLengthW, GetWindowTextW, WS_BORDER,
    WS_VISIBLE,
};
use windows::core::{PCWSTR, w};
use wmi::{COMLibrary, Variant, WMIConnection};

use super::{Capability, Platform};
use crate::counter::{CounterKey, CounterSource};
use crate::error::{MetricError, Probe, Result};
use crate::stats::{BiosInfo, CpuInfo, DiskInfo};

type Row = HashMap<String, Variant>;

/// 实例不存在：添加计数器时，或实例消失后采样时
const PDH_CSTATUS_NO_INSTANCE: u32 = 0x800007D1;
/// 查询中没有任何计数器产生数据，实例全部消失时出现
const PDH_NO_DATA: u32 = 0x800007D5;

#[derive(Debug, Default)]
pub struct WindowsPlatform;

impl WindowsPlatform {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Platform for WindowsPlatform {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    fn open_counter(&self, key: &CounterKey) -> Result<Box<dyn CounterSource>> {
        Ok(Box::new(PdhCounter::open(key)?))
    }

    fn process_instance(&self, pid: u32) -> Result<String> {
        let rows = wmi_query(
            None,
            &format!("SELECT Name FROM Win32_PerfFormattedData_PerfProc_Process WHERE IDProcess = {pid}"),
        )?;
        rows.first()
            .map(|row| text(row, "Name"))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| MetricError::MissingInstance(format!("进程 {pid}")))
    }

    fn total_physical_memory(&self) -> Result<u64> {
        let rows = wmi_query(None, "SELECT TotalPhysicalMemory FROM Win32_ComputerSystem")?;
        Ok(rows
            .first()
            .and_then(|row| number(row, "TotalPhysicalMemory"))
            .unwrap_or(0))
    }

    fn cpu_count(&self) -> Result<usize> {
        Ok(wmi_query(None, "SELECT DeviceID FROM Win32_Processor")?.len())
    }

    fn cpu_info(&self) -> Result<Vec<CpuInfo>> {
        let rows = wmi_query(
            None,
            "SELECT DeviceID, Name, Manufacturer, CurrentClockSpeed, MaxClockSpeed, DataWidth, \
             ProcessorId, NumberOfCores, NumberOfLogicalProcessors FROM Win32_Processor",
        )?;
        Ok(rows
            .iter()
            .map(|row| CpuInfo {
                device_id: text(row, "DeviceID"),
                name: text(row, "Name"),
                manufacturer: text(row, "Manufacturer"),
                current_clock_speed: number(row, "CurrentClockSpeed").map(|n| n as u32),
                max_clock_speed: number(row, "MaxClockSpeed").map(|n| n as u32),
                data_width: number(row, "DataWidth").map(|n| n as u32),
                serial_number: Some(text(row, "ProcessorId")).filter(|s| !s.is_empty()),
                number_of_cores: number(row, "NumberOfCores").unwrap_or(0) as u32,
                number_of_logical_processors: number(row, "NumberOfLogicalProcessors")
                    .unwrap_or(0) as u32,
            })
            .collect())
    }

    fn cpu_temperature(&self) -> Result<Probe<f32>> {
        let rows = wmi_query(
            Some("root\\WMI"),
            "SELECT CurrentTemperature FROM MSAcpi_ThermalZoneTemperature",
        )?;
        // 十分之一开尔文
        Ok(rows
            .first()
            .and_then(|row| number(row, "CurrentTemperature"))
            .map(|tenths| Probe::Value((tenths as f32 - 2732.0) / 10.0))
            .unwrap_or(Probe::Absent))
    }

    fn disk_info(&self) -> Result<Vec<DiskInfo>> {
        let rows = wmi_query(
            None,
            "SELECT Index, Model, MediaType, SerialNumber, Size FROM Win32_DiskDrive",
        )?;
        Ok(rows
            .iter()
            .map(|row| DiskInfo {
                index: number(row, "Index").unwrap_or(0) as u32,
                model: text(row, "Model"),
                media_type: text(row, "MediaType"),
                serial_number: text(row, "SerialNumber"),
                total: number(row, "Size").unwrap_or(0),
            })
            .collect())
    }

    fn network_instances(&self) -> Result<Vec<String>> {
        let rows = wmi_query(
            None,
            "SELECT Name FROM Win32_PerfRawData_Tcpip_NetworkInterface",
        )?;
        Ok(rows
            .iter()
            .map(|row| text(row, "Name"))
            .filter(|name| !name.is_empty())
            .collect())
    }

    fn mac_addresses(&self) -> Result<Vec<String>> {
        let rows = wmi_query(
            None,
            "SELECT MACAddress FROM Win32_NetworkAdapterConfiguration WHERE IPEnabled = TRUE",
        )?;
        Ok(rows
            .iter()
            .map(|row| text(row, "MACAddress"))
            .filter(|mac| !mac.is_empty())
            .collect())
    }

    fn local_ips(&self) -> Result<Vec<IpAddr>> {
        let rows = wmi_query(
            None,
            "SELECT IPAddress FROM Win32_NetworkAdapterConfiguration WHERE IPEnabled = TRUE",
        )?;
        Ok(rows.iter().flat_map(|row| addresses(row, "IPAddress")).collect())
    }

    fn network_card_address(&self) -> Result<String> {
        let rows = wmi_query(
            None,
            "SELECT MACAddress FROM Win32_NetworkAdapter \
             WHERE MACAddress IS NOT NULL AND Manufacturer <> 'Microsoft'",
        )?;
        Ok(rows
            .first()
            .map(|row| text(row, "MACAddress"))
            .unwrap_or_default())
    }

    fn boot_time(&self) -> Result<DateTime<Utc>> {
        let rows = wmi_query(
            None,
            "SELECT LastBootUpTime FROM Win32_OperatingSystem WHERE Primary = TRUE",
        )?;
        let raw = rows
            .first()
            .map(|row| text(row, "LastBootUpTime"))
            .unwrap_or_default();
        parse_cim_datetime(&raw)
    }

    fn system_type(&self) -> Result<String> {
        let rows = wmi_query(None, "SELECT SystemType FROM Win32_ComputerSystem")?;
        Ok(rows
            .first()
            .map(|row| text(row, "SystemType"))
            .unwrap_or_default())
    }

    fn bios_serial_number(&self) -> Result<String> {
        let rows = wmi_query(None, "SELECT SerialNumber FROM Win32_BIOS")?;
        Ok(rows
            .first()
            .map(|row| text(row, "SerialNumber"))
            .unwrap_or_default())
    }

    fn board_info(&self) -> Result<BiosInfo> {
        let rows = wmi_query(None, "SELECT Manufacturer, SerialNumber FROM Win32_BaseBoard")?;
        let Some(board) = rows.first() else {
            return Ok(BiosInfo::default());
        };

        let guid = registry_string(w!("SOFTWARE\\Microsoft\\Cryptography"), w!("MachineGuid"))?
            .unwrap_or_default();
        let uuid = registry_string(w!("SYSTEM\\HardwareConfig"), w!("LastConfig"))?
            .map(|s| s.trim_matches(|c| c == '{' || c == '}').to_uppercase())
            .unwrap_or_default();

        let mut model = registry_string(
            w!("HARDWARE\\DESCRIPTION\\System\\BIOS"),
            w!("SystemProductName"),
        )?
        .map(|s| s.replace("System Product Name", ""))
        .unwrap_or_default();
        if model.trim().is_empty() {
            model = registry_string(
                w!("HARDWARE\\DESCRIPTION\\System\\BIOS"),
                w!("BaseBoardProduct"),
            )?
            .unwrap_or_default();
        }

        Ok(BiosInfo {
            manufacturer: text(board, "Manufacturer"),
            id: text(board, "SerialNumber"),
            model: model.trim().to_string(),
            serial_number: String::new(),
            guid,
            uuid,
        })
    }

    fn open_window_titles(&self) -> Result<Vec<String>> {
        let mut titles: Vec<String> = Vec::new();
        unsafe {
            EnumWindows(
                Some(collect_window_title),
                LPARAM(&mut titles as *mut Vec<String> as isize),
            )
            .map_err(|e| MetricError::Query(format!("EnumWindows: {e}")))?;
        }
        Ok(titles)
    }

    fn sensor_document(&self) -> Result<Option<String>> {
        unsafe {
            let Ok(mapping) = OpenFileMappingW(FILE_MAP_READ.0, false, w!("AIDA64_SensorValues"))
            else {
                debug!("AIDA64 共享内存不存在");
                return Ok(None);
            };

            let view = MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, 0);
            if view.Value.is_null() {
                let _ = CloseHandle(mapping);
                return Err(MetricError::Query("无法映射 AIDA64 共享内存".to_string()));
            }

            let mut info = MEMORY_BASIC_INFORMATION::default();
            let queried = VirtualQuery(
                Some(view.Value as *const c_void),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            );
            let region = if queried == 0 { 0 } else { info.RegionSize };

            let bytes = std::slice::from_raw_parts(view.Value as *const u8, region);
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            let document = String::from_utf8_lossy(&bytes[..end]).into_owned();

            let _ = UnmapViewOfFile(view);
            let _ = CloseHandle(mapping);
            Ok(Some(document))
        }
    }
}

unsafe extern "system" fn collect_window_title(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let titles = unsafe { &mut *(lparam.0 as *mut Vec<String>) };
    let style = unsafe { GetWindowLongW(hwnd, GWL_STYLE) } as u32;
    let wanted = WS_VISIBLE.0 | WS_BORDER.0;
    if style & wanted != wanted {
        return TRUE;
    }

    let len = unsafe { GetWindowTextLengthW(hwnd) };
    if len <= 0 {
        return TRUE;
    }
    let mut buffer = vec![0u16; len as usize + 1];
    let copied = unsafe { GetWindowTextW(hwnd, &mut buffer) };
    if copied > 0 {
        titles.push(String::from_utf16_lossy(&buffer[..copied as usize]));
    }
    TRUE
}

/// 单个 PDH 查询中的一个计数器
struct PdhCounter {
    name: String,
    query: isize,
    counter: isize,
    collected: bool,
}

impl PdhCounter {
    fn open(key: &CounterKey) -> Result<Self> {
        let path = match &key.instance {
            Some(instance) => format!("\\{}({})\\{}", key.category, instance, key.counter),
            None => format!("\\{}\\{}", key.category, key.counter),
        };
        let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();

        unsafe {
            let mut query: isize = 0;
            let status = PdhOpenQueryW(None, 0, &mut query);
            if status != ERROR_SUCCESS.0 {
                return Err(MetricError::Query(format!("PdhOpenQuery 失败: {status:#x}")));
            }

            let mut counter: isize = 0;
            let status = PdhAddEnglishCounterW(query, PCWSTR(wide.as_ptr()), 0, &mut counter);
            if status != ERROR_SUCCESS.0 {
                let _ = PdhCloseQuery(query);
                return Err(match status {
                    PDH_CSTATUS_NO_INSTANCE => MetricError::MissingInstance(key.to_string()),
                    _ => MetricError::UnknownCounter(format!("{key} ({status:#x})")),
                });
            }

            Ok(Self {
                name: key.to_string(),
                query,
                counter,
                collected: false,
            })
        }
    }
}

impl CounterSource for PdhCounter {
    fn next_value(&mut self) -> Result<f64> {
        unsafe {
            let status = PdhCollectQueryData(self.query);
            if status == PDH_NO_DATA {
                return Err(MetricError::MissingInstance(self.name.clone()));
            }
            if status != ERROR_SUCCESS.0 {
                return Err(MetricError::Query(format!("PdhCollectQueryData 失败: {status:#x}")));
            }

            let mut value = PDH_FMT_COUNTERVALUE::default();
            let status =
                PdhGetFormattedCounterValue(self.counter, PDH_FMT_DOUBLE, None, &mut value);
            let first = !self.collected;
            self.collected = true;

            if status == PDH_CSTATUS_NO_INSTANCE || value.CStatus == PDH_CSTATUS_NO_INSTANCE {
                return Err(MetricError::MissingInstance(self.name.clone()));
            }
            if status != ERROR_SUCCESS.0 {
                // 速率类计数器需要两次采集才有数据
                if first {
                    return Ok(0.0);
                }
                return Err(MetricError::Query(format!(
                    "PdhGetFormattedCounterValue 失败: {status:#x}"
                )));
            }
            Ok(value.Anonymous.doubleValue)
        }
    }
}

impl Drop for PdhCounter {
    fn drop(&mut self) {
        unsafe {
            let _ = PdhCloseQuery(self.query);
        }
    }
}

fn wmi_error(e: wmi::WMIError) -> MetricError {
    MetricError::Query(format!("WMI: {e}"))
}

fn wmi_query(namespace: Option<&str>, query: &str) -> Result<Vec<Row>> {
    let com = COMLibrary::new().map_err(wmi_error)?;
    let connection = match namespace {
        Some(path) => WMIConnection::with_namespace_path(path, com),
        None => WMIConnection::new(com),
    }
    .map_err(wmi_error)?;
    debug!("WMI 查询: {query}");
    connection.raw_query::<Row>(query).map_err(wmi_error)
}

fn text(row: &Row, field: &str) -> String {
    match row.get(field) {
        Some(Variant::String(s)) => s.trim().to_string(),
        Some(other) => variant_number(other)
            .map(|n| n.to_string())
            .unwrap_or_default(),
        None => String::new(),
    }
}

/// 字符串数组字段中可解析的非回环地址
fn addresses(row: &Row, field: &str) -> Vec<IpAddr> {
    let Some(Variant::Array(items)) = row.get(field) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Variant::String(s) => s.trim().parse::<IpAddr>().ok(),
            _ => None,
        })
        .filter(|ip| !ip.is_loopback())
        .collect()
}

fn number(row: &Row, field: &str) -> Option<u64> {
    row.get(field).and_then(variant_number)
}

/// WMI 把 uint64 以字符串返回，其余整数按原类型返回
fn variant_number(value: &Variant) -> Option<u64> {
    match value {
        Variant::UI1(n) => Some(u64::from(*n)),
        Variant::UI2(n) => Some(u64::from(*n)),
        Variant::UI4(n) => Some(u64::from(*n)),
        Variant::UI8(n) => Some(*n),
        Variant::I1(n) => u64::try_from(*n).ok(),
        Variant::I2(n) => u64::try_from(*n).ok(),
        Variant::I4(n) => u64::try_from(*n).ok(),
        Variant::I8(n) => u64::try_from(*n).ok(),
        Variant::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 读取 HKLM 下的字符串值（64 位视图）；键或值不存在时返回 None
fn registry_string(subkey: PCWSTR, value: PCWSTR) -> Result<Option<String>> {
    let flags = RRF_RT_REG_SZ | RRF_SUBKEY_WOW6464KEY;
    unsafe {
        let mut size: u32 = 0;
        let status = RegGetValueW(HKEY_LOCAL_MACHINE, subkey, value, flags, None, None, Some(&mut size));
        if status != ERROR_SUCCESS && status != ERROR_MORE_DATA {
            return Ok(None);
        }

        let mut buffer = vec![0u16; (size as usize).div_ceil(2)];
        let status = RegGetValueW(
            HKEY_LOCAL_MACHINE,
            subkey,
            value,
            flags,
            None,
            Some(buffer.as_mut_ptr() as *mut c_void),
            Some(&mut size),
        );
        if status != ERROR_SUCCESS {
            return Err(MetricError::Query(format!("注册表读取失败: {status:?}")));
        }

        let end = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
        Ok(Some(String::from_utf16_lossy(&buffer[..end])))
    }
}

/// 解析 CIM_DATETIME，例如 `20240501083015.500000+480`（偏移以分钟计）
pub(crate) fn parse_cim_datetime(raw: &str) -> Result<DateTime<Utc>> {
    let invalid = || MetricError::Parse(format!("无效的 CIM 时间: {raw}"));

    let local = raw.get(..14).ok_or_else(invalid)?;
    let local = NaiveDateTime::parse_from_str(local, "%Y%m%d%H%M%S").map_err(|_| invalid())?;

    let offset = match raw.get(21..) {
        Some(tail) if !tail.is_empty() => tail.parse::<i64>().map_err(|_| invalid())?,
        _ => 0,
    };

    Ok((local - Duration::minutes(offset)).and_utc())
}
