//! sessioncast 主程序
//!
//! 加载配置、初始化日志与指标，然后运行会话桥接直到 Ctrl-C

mod cli;
mod observability;

use anyhow::Context;
use auth::device_code::DeviceCodeLogin;
use clap::Parser;
use observability::init_observability;
use sessioncast::{BridgeConfig, Error, Result, SessionBridge};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*)
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*)
    };
}

use cli::{Cli, Commands};

/// Application launcher utilities
struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().unwrap_or(&cli.config))?;
            ApplicationLauncher::test_config_file(&config_path)
        }
        Some(Commands::Login) => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(ApplicationLauncher::login(&config_path))
        }
        None => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;

            // Create Tokio runtime（before running the application）
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            runtime.block_on(ApplicationLauncher::run_application(&config_path))
        }
    }
}

impl ApplicationLauncher {
    /// Find config file with fallback locations
    fn find_config_file(provided_path: &PathBuf) -> Result<PathBuf> {
        if provided_path != Path::new("config.toml") {
            if provided_path.exists() {
                bootstrap_info!("Using provided config file: {:?}", provided_path);
                return Ok(provided_path.clone());
            } else {
                bootstrap_error!("Provided config file not found: {:?}", provided_path);
                return Err(Error::custom(format!(
                    "Config file not found: {provided_path:?}"
                )));
            }
        }

        let fallback_paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/sessioncast/config.toml"),
        ];

        bootstrap_info!("Searching for config file in default locations...");

        for path in &fallback_paths {
            if path.exists() {
                bootstrap_info!("Found config file: {:?}", path);
                return Ok(path.clone());
            } else {
                bootstrap_info!("Config not found at: {:?}", path);
            }
        }

        bootstrap_error!("No configuration file found!");
        bootstrap_error!("Please create a config file in one of these locations:");
        for (i, path) in fallback_paths.iter().enumerate() {
            bootstrap_error!("  {}. {:?}", i + 1, path);
        }
        bootstrap_error!("Or specify a custom path with: sessioncast --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// 测试配置文件是否有效
    fn test_config_file(config_path: &Path) -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();

        let config = match BridgeConfig::from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                error!("❌ 配置文件解析失败: {}", e);
                return Err(Error::service_validation(format!("配置解析失败: {e}")));
            }
        };
        info!("✅ 配置文件解析成功: {:?}", config_path);

        if let Err(errors) = config.validate() {
            error!("❌ 配置验证发现问题:");
            for (i, err) in errors.iter().enumerate() {
                if err.starts_with("Warning:") {
                    info!("  {}. ⚠️  {}", i + 1, err);
                } else {
                    error!("  {}. ❌ {}", i + 1, err);
                }
            }
            if errors.iter().any(|e| !e.starts_with("Warning:")) {
                return Err(Error::service_validation("配置验证失败"));
            }
        }

        info!("✅ 配置验证通过");
        Ok(())
    }

    /// 加载并验证配置；警告只打印，不阻止启动
    fn load_config(config_path: &Path) -> Result<BridgeConfig> {
        bootstrap_info!("📄 加载配置文件: {:?}", config_path);

        let config = BridgeConfig::from_file(config_path).map_err(|e| {
            bootstrap_error!("❌ 配置加载失败: {}", e);
            Error::custom(format!("配置加载失败: {e}"))
        })?;

        match config.check() {
            Ok(warnings) => {
                for warning in &warnings {
                    bootstrap_info!("  ⚠️  {}", warning);
                }
            }
            Err(e) => {
                bootstrap_error!("❌ {}", e);
                return Err(Error::custom("配置验证失败，请修复上述错误"));
            }
        }

        bootstrap_info!("✅ 配置加载成功");
        Ok(config)
    }

    /// 设备码登录，把 refresh token 写入 `auth.refresh_token_file`
    async fn login(config_path: &Path) -> Result<()> {
        let config = BridgeConfig::from_file(config_path)?;
        let _observability_guard = init_observability(&config)?;

        let login = DeviceCodeLogin::new(&config.auth)?;
        login
            .login(|code| {
                bootstrap_info!(
                    "To sign in, open {} and enter the code {}",
                    code.verification_uri,
                    code.user_code
                );
            })
            .await?;

        match &config.auth.refresh_token_file {
            Some(path) => bootstrap_info!("✅ 登录成功，refresh token 已保存到 {:?}", path),
            None => bootstrap_info!("✅ 登录成功（未配置 auth.refresh_token_file，令牌未保存）"),
        }
        Ok(())
    }

    /// 运行应用程序的主入口
    async fn run_application(config_path: &Path) -> Result<()> {
        let config = Self::load_config(config_path)?;
        let _observability_guard = init_observability(&config)?;

        if let Err(e) = sessioncast_common::metrics::register_metrics() {
            warn!(
                "Prometheus metrics registration warning (may already be registered): {}",
                e
            );
        }

        info!("🚀 启动会话桥接 {} ({})", config.name, config.env);

        let shutdown = CancellationToken::new();
        setup_ctrl_c_handler(shutdown.clone());

        let bridge = SessionBridge::connect(config)
            .await
            .context("Failed to start session bridge")?;
        let exit = bridge.run(shutdown).await;

        if exit.is_failure() {
            error!("🛑 会话桥接异常退出: {}", exit);
            return Err(Error::service_startup(exit.to_string()));
        }
        info!("🛑 会话桥接已安全关闭");
        Ok(())
    }
}

/// 设置Ctrl-C信号处理程序
fn setup_ctrl_c_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听Ctrl-C信号: {}", e);
            return;
        }
        info!("收到Ctrl-C信号，开始优雅关闭...");
        shutdown.cancel();
    });
}
