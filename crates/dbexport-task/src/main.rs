use std::env;
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::process::exit;

use serde::Serialize;
use tracing_appender::{non_blocking, rolling::never};
use tracing_subscriber::{EnvFilter, fmt::layer, layer::SubscriberExt, util::SubscriberInitExt};

use dbexport_core::{ExportConfig, run};

const USAGE: &str = "用法: dbexport <config.properties> [--debug] [--log-dir <DIR>]";

/// 进度输出消息（写入 stdout 的 JSON Lines）
#[derive(Debug, Serialize)]
pub struct ProgressMessage {
    kind: MessageKind,
    data: serde_json::Value,
}

/// 消息类型
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Error,
    Completed,
}

/// 命令行参数
#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    debug: bool,
    log_dir: Option<PathBuf>,
}

fn parse_args<I>(args: I) -> Args
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--debug" => parsed.debug = true,
            "--log-dir" => parsed.log_dir = args.next().map(PathBuf::from),
            _ if parsed.config.is_none() => parsed.config = Some(PathBuf::from(arg)),
            _ => {}
        }
    }
    parsed
}

/// 初始化日志：stdout 输出，指定 `--log-dir` 时同时写入 dbexport.log
fn init_logging(
    log_dir: Option<&Path>,
    debug: bool,
) -> Option<non_blocking::WorkerGuard> {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = non_blocking(never(dir, "dbexport.log"));
            (Some(layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer().with_writer(stdout))
        .with(file_layer)
        .init();

    guard
}

fn main() {
    // 1. 解析命令行参数
    let args = parse_args(env::args().skip(1));
    let Some(config_path) = args.config else {
        eprintln!("{}", USAGE);
        exit(1);
    };
    let debug = args.debug || env::var("DEBUG").is_ok_and(|v| v.eq_ignore_ascii_case("true"));

    // 2. 初始化日志系统
    let _log_guard = init_logging(args.log_dir.as_deref(), debug);
    tracing::info!("导出进程启动，配置文件: {:?}", config_path);

    // 3. 读取配置
    let config = match ExportConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            print_error("fatal", &e.to_string());
            exit(1);
        }
    };
    tracing::debug!("配置加载成功: {:?}", config);

    // 4. 执行导出
    match run(&config, debug) {
        Ok(summary) => match serde_json::to_value(&summary) {
            Ok(data) => print_completed(data),
            Err(e) => tracing::warn!("序列化导出结果失败: {}", e),
        },
        Err(e) => {
            tracing::error!("导出失败: {}", e);
            print_error("fatal", &e.to_string());
            exit(1);
        }
    }
}

pub fn print_error(
    severity: &str,
    message: &str,
) {
    print_progress(ProgressMessage {
        kind: MessageKind::Error,
        data: serde_json::json!({
            "severity": severity,
            "message": message,
        }),
    });
}

pub fn print_completed(data: serde_json::Value) {
    print_progress(ProgressMessage {
        kind: MessageKind::Completed,
        data,
    });
}

pub fn print_progress(msg: ProgressMessage) {
    if let Ok(json) = serde_json::to_string(&msg) {
        println!("{}", json);
    }
}
