//! 日志初始化
//!
//! 控制台输出带 ANSI 颜色；文件输出按天轮转或追加到单个 `sessioncast.log`。

use sessioncast::Result;
use sessioncast_common::config::{BridgeConfig, LogConfig, ObservabilityConfig};
use std::fs;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

const LOG_FILE_NAME: &str = "sessioncast.log";

/// 日志写入线程的 guard，需在进程生命周期内持有
#[derive(Default)]
pub struct ObservabilityGuard {
    log_guard: Option<WorkerGuard>,
}

/// Initialize logging based on configuration
pub fn init_observability(config: &BridgeConfig) -> Result<ObservabilityGuard> {
    let mut guard = ObservabilityGuard::default();
    let observability = &config.observability;

    match observability.log.output.as_str() {
        "file" => {
            fs::create_dir_all(&observability.log.path)?;
            let (non_blocking, worker_guard) =
                build_file_writer(&observability.log, config.should_rotate_logs())?;
            guard.log_guard = Some(worker_guard);
            init_subscriber_with_writer(non_blocking, false, observability);
        }
        _ => init_subscriber_with_writer(std::io::stdout, true, observability),
    }

    Ok(guard)
}

/// Create an EnvFilter from config, with RUST_LOG taking precedence
fn create_env_filter(config: &ObservabilityConfig) -> EnvFilter {
    let directive = std::env::var("RUST_LOG")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| config.filter_level.clone());

    EnvFilter::try_new(&directive).unwrap_or_else(|_| {
        println!(
            "Failed to parse filter directive: {}. Falling back to default: info",
            directive
        );
        EnvFilter::new("info")
    })
}

fn init_subscriber_with_writer<W>(writer: W, use_ansi: bool, config: &ObservabilityConfig)
where
    W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(use_ansi)
        .with_writer(writer);

    // 重复初始化（例如测试中）保持第一个订阅者
    tracing_subscriber::registry()
        .with(create_env_filter(config))
        .with(fmt_layer)
        .try_init()
        .ok();
}

fn build_file_writer(log_config: &LogConfig, rotate: bool) -> Result<(NonBlocking, WorkerGuard)> {
    if rotate {
        println!("日志写入模式: 文件（按天轮转）, 路径: {}", log_config.path);
        let file_appender = tracing_appender::rolling::daily(&log_config.path, LOG_FILE_NAME);
        Ok(tracing_appender::non_blocking(file_appender))
    } else {
        let log_file_path = std::path::Path::new(&log_config.path).join(LOG_FILE_NAME);
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path)?;
        Ok(tracing_appender::non_blocking(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_writer_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_config = LogConfig {
            output: "file".to_string(),
            rotate: false,
            path: dir.path().display().to_string(),
        };

        let (_writer, _guard) = build_file_writer(&log_config, false).unwrap();
        assert!(dir.path().join(LOG_FILE_NAME).is_file());
    }

    #[test]
    fn test_invalid_directive_falls_back() {
        let config = ObservabilityConfig {
            filter_level: "info,[".to_string(),
            ..Default::default()
        };
        // RUST_LOG 未设置时使用配置值；非法指令退回 info
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(create_env_filter(&config).to_string(), "info");
        }
    }
}
