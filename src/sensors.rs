//! AIDA64 共享内存传感器文档解析
//!
//! AIDA64 开启共享内存后，会在 `AIDA64_SensorValues` 中发布一段以 NUL 结尾的伪 XML：
//! 一串没有根节点的扁平元素，每个元素形如
//! `<temp><id>TCPU</id><label>CPU</label><value>41</value></temp>`。

use std::fmt;

use crate::error::{MetricError, Result};

/// 传感器类型，由元素名决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    System,
    Temperature,
    CoolingFan,
    FanSpeed,
    Voltage,
    Current,
    Power,
    Unknown,
}

impl SensorType {
    pub fn from_code(code: &str) -> Self {
        match code {
            "sys" => SensorType::System,
            "temp" => SensorType::Temperature,
            "fan" => SensorType::CoolingFan,
            "duty" => SensorType::FanSpeed,
            "volt" => SensorType::Voltage,
            "curr" => SensorType::Current,
            "pwr" => SensorType::Power,
            _ => SensorType::Unknown,
        }
    }
}

/// 单个传感器读数
#[derive(Debug, Clone, PartialEq)]
pub struct SensorValue {
    pub sensor_type: SensorType,
    pub identifier: String,
    pub name: String,
    pub value: String,
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} ({}) = {}",
            self.sensor_type, self.name, self.identifier, self.value
        )
    }
}

/// 解析整份传感器文档
pub fn parse_document(document: &str) -> Result<Vec<SensorValue>> {
    let mut sensors = Vec::new();
    let mut rest = document.trim_end_matches('\0');

    while let Some((kind, inner, tail)) = next_element(rest)? {
        let mut sensor = SensorValue {
            sensor_type: SensorType::from_code(kind),
            identifier: String::new(),
            name: String::new(),
            value: String::new(),
        };

        let mut children = inner;
        while let Some((child, text, tail)) = next_element(children)? {
            match child {
                "id" => sensor.identifier = unescape(text),
                "label" => sensor.name = unescape(text),
                "value" => sensor.value = unescape(text),
                _ => {}
            }
            children = tail;
        }

        sensors.push(sensor);
        rest = tail;
    }

    Ok(sensors)
}

/// 取出下一个元素：返回（元素名, 内容, 剩余输入），没有更多元素时返回 None
fn next_element(input: &str) -> Result<Option<(&str, &str, &str)>> {
    let Some(open) = input.find('<') else {
        return Ok(None);
    };
    let after_open = &input[open + 1..];
    let close = after_open
        .find('>')
        .ok_or_else(|| MetricError::Parse("标签缺少 '>'".to_string()))?;
    let tag = after_open[..close].trim();
    let body = &after_open[close + 1..];

    if let Some(name) = tag.strip_suffix('/') {
        return Ok(Some((name.trim(), "", body)));
    }
    if tag.is_empty() || tag.starts_with('/') {
        return Err(MetricError::Parse(format!("意外的标签 <{tag}>")));
    }

    let end_tag = format!("</{tag}>");
    let end = body
        .find(&end_tag)
        .ok_or_else(|| MetricError::Parse(format!("元素 <{tag}> 未闭合")))?;

    Ok(Some((tag, &body[..end], &body[end + end_tag.len()..])))
}

fn unescape(text: &str) -> String {
    text.trim()
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
