use crate::counter::CounterKey;
use crate::error::MetricError;
use crate::format::format_bytes_with;
use crate::stats::{HostInfo, Metric, SystemStats};
use anyhow::{Context, Result};
use hyper::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use hyper::http::StatusCode;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

/// 状态服务器
pub struct StatusServer {
    host: HostInfo,
}

impl StatusServer {
    /// 创建新的状态服务器实例
    #[inline]
    pub fn new(host: HostInfo) -> Self {
        Self { host }
    }

    /// 运行服务器
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let host = self.host;

        let make_svc = make_service_fn(move |_conn| {
            let host = host.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let host = host.clone();
                    Self::handle_request(req, host)
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .with_context(|| format!("无法绑定地址 {addr}"))?
            .http1_keepalive(true)
            .http1_half_close(false)
            .tcp_keepalive(Some(std::time::Duration::from_secs(10)))
            .tcp_nodelay(true)
            .serve(make_svc);

        info!("服务器运行在: http://{addr}");

        server.await.map_err(|e| {
            error!("服务器错误: {e}");
            anyhow::anyhow!("服务器运行错误: {e}")
        })?;

        info!("服务器正常关闭");
        Ok(())
    }

    /// 处理 HTTP 请求
    async fn handle_request(
        req: Request<Body>,
        host: HostInfo,
    ) -> std::result::Result<Response<Body>, Infallible> {
        if req.method() != Method::GET {
            return Ok(Self::serve_404());
        }

        let path = req.uri().path();
        let segments: Vec<&str> = path
            .trim_start_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let response = match segments.as_slice() {
            [] => Self::serve_html(host).await,
            ["health"] => Self::serve_health(),
            ["metrics"] => Self::serve_metric_list(),
            ["metrics", name] => Self::serve_metric(host, name).await,
            ["counters", category, counter] => {
                Self::serve_counter(host, category, counter, None).await
            }
            ["counters", category, counter, instance] => {
                Self::serve_counter(host, category, counter, Some(*instance)).await
            }
            _ => Self::serve_404(),
        };
        Ok(response)
    }

    /// 提供健康检查端点
    #[inline]
    fn serve_health() -> Response<Body> {
        let mut response = text_response(StatusCode::OK, "OK".to_string());
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }

    /// 提供 404 页面
    #[inline]
    fn serve_404() -> Response<Body> {
        warn!("请求了不存在的页面");
        text_response(StatusCode::NOT_FOUND, "页面未找到".to_string())
    }

    /// 提供错误页面
    #[inline]
    fn serve_error(message: String, status: StatusCode) -> Response<Body> {
        text_response(status, message)
    }

    /// 指标名称列表，每行一个
    fn serve_metric_list() -> Response<Body> {
        let names: Vec<&str> = Metric::ALL.iter().map(Metric::as_str).collect();
        text_response(StatusCode::OK, names.join("\n"))
    }

    /// 按名称获取单个指标
    async fn serve_metric(host: HostInfo, name: &str) -> Response<Body> {
        let metric: Metric = match name.parse() {
            Ok(metric) => metric,
            Err(_) => {
                warn!("未知指标: {name}");
                return Self::serve_404();
            }
        };

        match tokio::task::spawn_blocking(move || host.get(metric)).await {
            Ok(Ok(value)) => text_response(StatusCode::OK, value.to_string()),
            Ok(Err(e)) => {
                error!("获取指标 {metric} 失败: {e}");
                Self::serve_error(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            }
            Err(e) => {
                error!("指标任务异常退出: {e}");
                Self::serve_error("数据获取失败".to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// 按（类别, 计数器, 实例）采样
    async fn serve_counter(
        host: HostInfo,
        category: &str,
        counter: &str,
        instance: Option<&str>,
    ) -> Response<Body> {
        let decoded = (
            percent_decode(category),
            percent_decode(counter),
            instance.map(percent_decode),
        );
        let key = match decoded {
            (Some(category), Some(counter), None) => CounterKey::new(&category, &counter, None),
            (Some(category), Some(counter), Some(Some(instance))) => {
                CounterKey::new(&category, &counter, Some(&instance))
            }
            _ => {
                return Self::serve_error(
                    "路径编码无效".to_string(),
                    StatusCode::BAD_REQUEST,
                );
            }
        };
        debug!("采样计数器 {key}");

        match tokio::task::spawn_blocking(move || host.sample_counter(&key)).await {
            Ok(Ok(value)) => text_response(StatusCode::OK, value.to_string()),
            Ok(Err(e @ (MetricError::UnknownCounter(_) | MetricError::MissingInstance(_)))) => {
                warn!("{e}");
                Self::serve_error(e.to_string(), StatusCode::NOT_FOUND)
            }
            Ok(Err(e @ MetricError::Unsupported(_))) => {
                warn!("{e}");
                Self::serve_error(e.to_string(), StatusCode::NOT_IMPLEMENTED)
            }
            Ok(Err(e)) => {
                error!("计数器采样失败: {e}");
                Self::serve_error(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            }
            Err(e) => {
                error!("计数器任务异常退出: {e}");
                Self::serve_error("数据获取失败".to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// 提供主页面
    async fn serve_html(host: HostInfo) -> Response<Body> {
        let compact = host.context().compact_format();
        match tokio::task::spawn_blocking(move || host.snapshot()).await {
            Ok(Ok(stats)) => {
                let mut response = Response::new(Body::from(Self::render_html_template(
                    &stats, compact,
                )));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/html; charset=utf-8"),
                );
                // 与页面的 meta refresh 保持一致
                response
                    .headers_mut()
                    .insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=10"));
                response
            }
            Ok(Err(e)) => {
                error!("获取系统数据失败: {e}");
                Self::serve_error("数据获取失败".to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            }
            Err(e) => {
                error!("系统数据任务异常退出: {e}");
                Self::serve_error("数据获取失败".to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// 渲染 HTML 模板
    pub fn render_html_template(stats: &SystemStats, compact: bool) -> String {
        let bytes = |v: f64| format_bytes_with(v, compact);
        let memory_percent = if stats.memory_total > 0 {
            (stats.memory_used() as f64 / stats.memory_total as f64 * 100.0) as u32
        } else {
            0
        };
        let boot_time = stats
            .boot_time
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "未知".to_string());

        let metric_links: String = Metric::ALL
            .iter()
            .map(|m| format!("<li><a href=\"/metrics/{m}\">{m}</a></li>\n"))
            .collect();

        // 使用内置模板（编译进二进制文件）
        let template = include_str!("../templates/index.html");

        let replacements = [
            ("{system_type}", escape_html(&stats.system_type)),
            ("{processor_count}", stats.processor_count.to_string()),
            ("{boot_time}", boot_time),
            ("{cpu_percent}", (stats.cpu_load as u32).to_string()),
            ("{cpu_load}", format!("{:.2}%", stats.cpu_load)),
            ("{cpu_temperature}", stats.cpu_temperature.to_string()),
            ("{memory_percent}", memory_percent.to_string()),
            ("{memory_p_data}", escape_html(&stats.memory_p_data)),
            ("{memory_v_data}", escape_html(&stats.memory_v_data)),
            ("{memory_used}", bytes(stats.memory_used() as f64)),
            ("{memory_total}", bytes(stats.memory_total as f64)),
            ("{disk_read}", bytes(stats.disk_read)),
            ("{disk_write}", bytes(stats.disk_write)),
            ("{net_received}", bytes(stats.net_received)),
            ("{net_sent}", bytes(stats.net_sent)),
            ("{metric_links}", metric_links),
            (
                "{timestamp}",
                stats.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            ),
        ];

        let mut result = String::with_capacity(template.len() + 2048);
        result.push_str(template);
        for (placeholder, value) in replacements {
            result = result.replace(placeholder, &value);
        }
        result
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// 解码路径段中的 `%XX`；`XX` 必须是两个十六进制数字，编码不完整或结果不是 UTF-8 时返回 None
fn percent_decode(segment: &str) -> Option<String> {
    let input = segment.as_bytes();
    let mut bytes = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            bytes.push(u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?);
            i += 3;
        } else {
            bytes.push(input[i]);
            i += 1;
        }
    }
    String::from_utf8(bytes).ok()
}

/// 配置结构
#[derive(Debug, Clone)]
pub struct Config {
    /// 服务端绑定地址
    pub bind_address: String,
    /// 服务端端口
    pub port: u16,
    /// 字节数只保留整数部分
    pub compact_format: bool,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            compact_format: false,
        }
    }
}

impl Config {
    /// 构建服务器地址，支持 IPv4 和 IPv6
    pub fn address(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .with_context(|| format!("无效的地址格式: {}", self.bind_address))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MetricsContext;
    use crate::error::Probe;
    use crate::platform::NullPlatform;
    use crate::platform::testing::FakePlatform;
    use chrono::{DateTime, Utc};
    use hyper::{Body, Request, StatusCode};
    use std::sync::Arc;

    fn fake_host() -> HostInfo {
        HostInfo::new(Arc::new(MetricsContext::new(Arc::new(FakePlatform::default()))))
    }

    fn create_test_stats(system_type: &str, cpu_load: f64) -> SystemStats {
        SystemStats {
            system_type: system_type.to_string(),
            processor_count: 8,
            cpu_load,
            cpu_temperature: Probe::Value(41.5),
            memory_total: 1024 * 1024 * 1024,    // 1GB
            memory_available: 256 * 1024 * 1024, // 256MB
            memory_p_data: "75.00% (768.00 MB / 1.00 GB)".to_string(),
            memory_v_data: String::new(),
            disk_read: 2048.0,
            disk_write: 0.0,
            net_received: 0.0,
            net_sent: 0.0,
            boot_time: DateTime::from_timestamp(0, 0),
            timestamp: Utc::now(),
        }
    }

    async fn get(host: HostInfo, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = StatusServer::handle_request(request, host).await.unwrap();
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(!config.compact_format);
    }

    #[test]
    fn test_config_address() {
        let config = Config::default();
        assert_eq!(config.address().unwrap().to_string(), "0.0.0.0:8080");

        let v6 = Config {
            bind_address: "::".to_string(),
            ..Config::default()
        };
        assert_eq!(v6.address().unwrap().to_string(), "[::]:8080");

        let invalid = Config {
            bind_address: "not-an-ip".to_string(),
            ..Config::default()
        };
        assert!(invalid.address().is_err());
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(
            percent_decode("%25%20Processor%20Time").as_deref(),
            Some("% Processor Time")
        );
        assert_eq!(percent_decode("_Total").as_deref(), Some("_Total"));
        assert_eq!(percent_decode("%E4%B8%AD").as_deref(), Some("中"));
        assert_eq!(percent_decode("%2"), None);
        assert_eq!(percent_decode("%zz"), None);
        assert_eq!(percent_decode("%FF"), None);
        // 符号不是十六进制数字
        assert_eq!(percent_decode("%+1"), None);
        assert_eq!(percent_decode("%-1"), None);
        assert_eq!(percent_decode("a%+f"), None);
    }

    #[tokio::test]
    async fn test_serve_health() {
        let response = StatusServer::serve_health();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-cache");

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(std::str::from_utf8(&body).unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_serve_404() {
        let response = StatusServer::serve_404();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(std::str::from_utf8(&body).unwrap(), "页面未找到");
    }

    #[tokio::test]
    async fn test_serve_error() {
        let message = "测试错误".to_string();
        let response =
            StatusServer::serve_error(message.clone(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(std::str::from_utf8(&body).unwrap(), message);
    }

    #[test]
    fn test_render_html_template() {
        let stats = create_test_stats("x64-based PC", 42.0);
        let html = StatusServer::render_html_template(&stats, false);

        assert!(html.contains("x64-based PC"));
        assert!(html.contains("42.00%"));
        assert!(html.contains("41.5"));
        assert!(html.contains("1.00 GB"));
        assert!(html.contains("768.00 MB"));
        assert!(html.contains("2.00 KB"));
        assert!(html.contains("1970-01-01 00:00:00 UTC"));
        assert!(html.contains("/metrics/cpu_load"));
        assert!(!html.contains("{memory_total}"));
    }

    #[test]
    fn test_render_html_template_compact_and_escaped() {
        let stats = create_test_stats("主机<>&\"", 0.0);
        let html = StatusServer::render_html_template(&stats, true);

        assert!(html.contains("主机&lt;&gt;&amp;&quot;"));
        assert!(html.contains("1GB"));
    }

    #[tokio::test]
    async fn test_handle_request_root() {
        let (status, html) = get(fake_host(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("x64-based PC"));
        assert!(html.contains("75.00% (12.00 GB / 16.00 GB)"));
    }

    #[tokio::test]
    async fn test_handle_request_health() {
        let (status, body) = get(fake_host(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[test]
    fn test_handle_request_metric_list() {
        let (status, body) = tokio_test::block_on(get(fake_host(), "/metrics"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.lines().count(), Metric::ALL.len());
        assert!(body.lines().any(|l| l == "sensor_values"));
    }

    #[tokio::test]
    async fn test_handle_request_metric() {
        let (status, body) = get(fake_host(), "/metrics/total_physical_memory").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "16.00 GB");

        let (status, body) = get(fake_host(), "/metrics/bios_serial_number").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "SN-42");
    }

    #[tokio::test]
    async fn test_handle_request_unknown_metric() {
        let (status, _) = get(fake_host(), "/metrics/gpu_load").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handle_request_metric_failure() {
        let host = HostInfo::new(Arc::new(MetricsContext::new(Arc::new(
            FakePlatform::failing(1),
        ))));
        let (status, body) = get(host.clone(), "/metrics/total_physical_memory").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("RPC"));

        // 失败不被缓存，下一次请求成功
        let (status, _) = get(host, "/metrics/total_physical_memory").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_handle_request_metric_unsupported_platform() {
        let host = HostInfo::new(Arc::new(MetricsContext::new(Arc::new(NullPlatform))));
        let (status, body) = get(host, "/metrics/cpu_load").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "0.00%");
    }

    #[tokio::test]
    async fn test_handle_request_counter() {
        let host = fake_host();
        let (status, body) =
            get(host.clone(), "/counters/Processor/%25%20Processor%20Time/_Total").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "25");

        let (status, body) = get(host, "/counters/Network%20Interface/Bytes%20Sent%2Fsec/eth0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "50");
    }

    #[tokio::test]
    async fn test_handle_request_counter_errors() {
        let (status, _) = get(fake_host(), "/counters/GPU/Utilization").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(fake_host(), "/counters/Processor/%zz").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(fake_host(), "/counters/Processor/%+1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let vanished = HostInfo::new(Arc::new(MetricsContext::new(Arc::new(
            FakePlatform::with_vanished_interface(),
        ))));
        let (status, body) =
            get(vanished, "/counters/Network%20Interface/Bytes%20Sent%2Fsec/veth_gone0").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("veth_gone0"));

        let null = HostInfo::new(Arc::new(MetricsContext::new(Arc::new(NullPlatform))));
        let (status, _) = get(null, "/counters/Processor/%25%20Processor%20Time").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_handle_request_404() {
        let (status, _) = get(fake_host(), "/notfound").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(fake_host(), "/counters/Processor").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handle_request_post_method() {
        let request = Request::builder()
            .method("POST")
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = StatusServer::handle_request(request, fake_host())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
