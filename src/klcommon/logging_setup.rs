//! 日志系统初始化模块
//!
//! 控制台输出 + 按天滚动的文件日志，依赖库通过 `log` 打出的日志经由 tracing-log 桥接

use crate::klcommon::config::LoggingConfig;
use crate::klcommon::{AppError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// 依赖库的噪音日志统一压到 warn
const DEPENDENCY_FILTERS: &str = "hyper=warn,reqwest=warn,rustls=warn";

/// 构建日志过滤器，RUST_LOG 优先于配置文件
fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},{}", config.log_level, DEPENDENCY_FILTERS)))
}

/// 初始化日志系统
///
/// 返回的 guard 必须由 main 持有到进程结束，否则文件日志的缓冲不会被刷新
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)?;

    tracing_log::LogTracer::init()
        .map_err(|e| AppError::ConfigError(format!("初始化log桥接失败: {}", e)))?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, &config.file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // 文件层：文本或JSON二选一
    let (json_layer, text_layer) = if config.json_file {
        (
            Some(fmt::layer().json().with_writer(file_writer).with_target(true)),
            None,
        )
    } else {
        (
            None,
            Some(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(true),
            ),
        )
    };

    let console_layer = config.console.then(|| fmt::layer().with_target(true));

    let subscriber = Registry::default()
        .with(build_filter(config))
        .with(json_layer)
        .with(text_layer)
        .with(console_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::ConfigError(format!("设置全局日志订阅者失败: {}", e)))?;

    tracing::info!(
        target: "logging",
        level = %config.log_level,
        dir = %config.log_dir.display(),
        "日志系统初始化完成"
    );

    Ok(guard)
}
