//! 日志初始化
//!
//! - stdout + `log-directory/log-file`（按天滚动，保留 `log-retain` 个文件）
//! - target 为 `metrics` 的事件单独写入 `metrics-log-file`
//!
//! 级别取自配置的 `log-level`，设置了 `RUST_LOG` 时以其为准

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::{ParseError, Targets};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to create log file: {0}")]
    Appender(#[from] InitError),
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("logging already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// 后台写日志线程的 guard，drop 时刷新缓冲
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

pub fn init(config: &LoggingConfig) -> Result<LogGuards, LoggingError> {
    let level = normalize_level(&config.log_level);

    let (app_writer, app_guard) =
        tracing_appender::non_blocking(file_appender(config, &config.log_file)?);
    let (metrics_writer, metrics_guard) =
        tracing_appender::non_blocking(file_appender(config, &config.metrics_log_file)?);

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(app_filter(level)?))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(app_writer)
                .with_filter(app_filter(level)?),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(metrics_writer)
                .with_filter(Targets::new().with_target("metrics", Level::INFO)),
        )
        .try_init()?;

    tracing::info!(
        directory = %config.log_directory.display(),
        file = %config.log_file,
        log_level = level,
        "Logging initialized"
    );

    Ok(LogGuards {
        _guards: vec![app_guard, metrics_guard],
    })
}

fn file_appender(config: &LoggingConfig, file: &str) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file)
        .max_log_files(config.log_retain)
        .build(&config.log_directory)
}

/// 应用日志过滤器，排除 `metrics` target
fn app_filter(level: &str) -> Result<EnvFilter, ParseError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    Ok(filter.add_directive("metrics=off".parse()?))
}

/// 兼容 `WARNING` / `CRITICAL` 等写法
fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level("INFO"), "info");
        assert_eq!(normalize_level("debug"), "debug");
        assert_eq!(normalize_level("WARNING"), "warn");
        assert_eq!(normalize_level("CRITICAL"), "error");
        assert_eq!(normalize_level("bogus"), "info");
    }

    #[test]
    fn test_file_appender_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            log_directory: dir.path().join("logs"),
            log_file: "actor.log".to_string(),
            metrics_log_file: "metrics.log".to_string(),
            log_level: "info".to_string(),
            log_retain: 3,
        };
        assert!(file_appender(&config, &config.log_file).is_ok());
        assert!(file_appender(&config, &config.metrics_log_file).is_ok());
    }
}
