use anyhow::Result;
use clap::Parser;
use host_metrics::{Config, HostInfo, Metric, StatusServer, create_context};
use log::{error, info};

/// 主机指标服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 服务器绑定地址 (默认: ::，支持 IPv4 和 IPv6)
    #[arg(short, long, default_value = "::")]
    address: String,

    /// 服务器端口 (默认: 8080)
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// 紧凑格式：字节数只保留整数部分
    #[arg(short, long)]
    compact: bool,

    /// 打印一次全部指标后退出，不启动服务器
    #[arg(short, long)]
    report: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level);

    let config = Config {
        bind_address: args.address.clone(),
        port: args.port,
        compact_format: args.compact,
    };

    info!(
        "配置信息 - 地址: {}, 端口: {}, 紧凑格式: {}",
        config.bind_address, config.port, config.compact_format
    );

    // 平台探测和 CPU 计数器预热都是阻塞调用
    let compact = config.compact_format;
    let context = tokio::task::spawn_blocking(move || create_context(compact)).await?;
    let host = HostInfo::new(context);
    info!("指标上下文初始化完成");

    if args.report {
        let report = tokio::task::spawn_blocking(move || print_report(&host)).await?;
        return report;
    }

    let addr = config.address()?;
    info!("服务器将在 {addr} 启动");

    StatusServer::new(host).run(addr).await
}

/// 逐项打印全部指标
fn print_report(host: &HostInfo) -> Result<()> {
    for metric in Metric::ALL {
        match host.get(metric) {
            Ok(value) => {
                let text = value.to_string();
                if text.contains('\n') {
                    println!("{metric}:");
                    for line in text.lines() {
                        println!("    {line}");
                    }
                } else {
                    println!("{metric}: {text}");
                }
            }
            Err(e) => error!("{metric}: {e}"),
        }
    }
    Ok(())
}

/// 初始化日志系统
fn init_logger(level: &str) {
    match env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .try_init()
    {
        Ok(_) => info!("日志系统初始化成功，级别: {level}"),
        Err(e) => eprintln!("日志系统初始化失败: {e}"),
    }
}
