//! ctrlink 主程序
//!
//! 读取配置，连接控制器并按子命令输出会话信息、监督连接或导出指标

mod cli;
mod error;
mod observability;

use apiconn::{Connector, Credential, DialPolicy, EndpointSet, LiveConnection};
use clap::Parser;
use ctrlink_common::config::{CtrlinkConfig, has_critical_errors};
use observability::init_observability;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use tracing::{error, info, warn};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};
use error::{Error, Result};

/// Application launcher utilities
struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().or(cli.config.as_ref()))?;
            ApplicationLauncher::test_config_file(&config_path)
        }
        command => {
            let config_path = ApplicationLauncher::find_config_file(cli.config.as_ref())?;

            // Create Tokio runtime（before running the application）
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            let command = match command {
                Some(Commands::Connect) => RunMode::Connect,
                Some(Commands::Metrics) => RunMode::Metrics,
                _ => RunMode::Watch,
            };

            // Run the asynchronous application
            runtime.block_on(ApplicationLauncher::run_application(&config_path, command))
        }
    }
}

/// 需要连接控制器的子命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Connect,
    Watch,
    Metrics,
}

impl ApplicationLauncher {
    /// Find config file with fallback locations
    fn find_config_file(provided_path: Option<&PathBuf>) -> Result<PathBuf> {
        if let Some(provided_path) = provided_path {
            if provided_path.exists() {
                bootstrap_info!("Using provided config file: {:?}", provided_path);
                return Ok(provided_path.clone());
            }
            bootstrap_error!("Provided config file not found: {:?}", provided_path);
            return Err(Error::custom(format!(
                "Config file not found: {provided_path:?}"
            )));
        }

        let fallback_paths = vec![
            // 1. Current working directory
            PathBuf::from("ctrlink.toml"),
            // 2. System config directory
            PathBuf::from("/etc/ctrlink/config.toml"),
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
        bootstrap_error!("Or specify a custom path with: ctrlink --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// 测试配置文件是否有效
    fn test_config_file(config_path: &Path) -> Result<()> {
        // Initialize basic logging for test command
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();

        let config = match CtrlinkConfig::from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                error!("❌ 配置文件解析失败: {}", e);
                return Err(Error::validation(format!("配置解析失败: {e}")));
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
            if has_critical_errors(&errors) {
                return Err(Error::validation("配置验证失败"));
            }
        }

        // 构建连接参数，捕获配置文件验证之外的问题（如 CA 文件不可读）
        Self::connection_parts(&config)?;

        info!("✅ 完整配置验证通过");
        Ok(())
    }

    /// 加载并验证配置
    fn load_config(config_path: &Path) -> Result<CtrlinkConfig> {
        bootstrap_info!("📄 加载配置文件: {:?}", config_path);

        let config = CtrlinkConfig::from_file(config_path).map_err(|e| {
            bootstrap_error!("❌ 配置加载失败: {}", e);
            e
        })?;
        bootstrap_info!("✅ 配置加载成功");

        if let Err(errors) = config.validate() {
            bootstrap_error!("❌ 配置验证发现问题:");
            for (i, err) in errors.iter().enumerate() {
                if err.starts_with("Warning:") {
                    bootstrap_info!("  {}. ⚠️  {}", i + 1, err);
                } else {
                    bootstrap_error!("  {}. ❌ {}", i + 1, err);
                }
            }
            if has_critical_errors(&errors) {
                return Err(Error::validation("配置验证失败，请修复上述错误"));
            }
        }

        Ok(config)
    }

    fn connection_parts(config: &CtrlinkConfig) -> Result<(EndpointSet, Credential, DialPolicy)> {
        let endpoints = EndpointSet::from_config(&config.controller)?;
        let credential = Credential::from_config(&config.login)?;
        let policy = DialPolicy::from_config(&config.dial);
        Ok((endpoints, credential, policy))
    }

    /// 运行应用程序的主入口
    async fn run_application(config_path: &Path, mode: RunMode) -> Result<()> {
        let config = Self::load_config(config_path)?;

        // 初始化可观测性系统（日志）
        let _observability_guard = init_observability(&config)?;

        if mode == RunMode::Metrics
            && let Err(e) = ctrlink_common::metrics::register_metrics()
        {
            warn!(
                "Prometheus metrics registration warning (may already be registered): {}",
                e
            );
        }

        let (endpoints, credential, policy) = Self::connection_parts(&config)?;

        // Ctrl-C 在拨号阶段取消连接，在 watch 阶段触发关闭
        let shutdown = CancellationToken::new();
        setup_ctrl_c_handler(shutdown.clone());

        info!(
            "🚀 [{}] 连接控制器: {}",
            config.name,
            config.controller.addresses.join(", ")
        );
        let conn = Connector::new(policy)
            .with_cancellation(shutdown.clone())
            .open(&endpoints, &credential)
            .await?;

        match mode {
            RunMode::Connect => {
                Self::display_session_info(&conn);
                conn.close().await?;
            }
            RunMode::Watch => {
                Self::display_session_info(&conn);
                Self::watch(&conn, &shutdown).await?;
            }
            RunMode::Metrics => {
                conn.close().await?;
                let text = ctrlink_common::metrics::export_metrics().map_err(anyhow::Error::from)?;
                print!("{text}");
            }
        }

        Ok(())
    }

    /// 等待连接断开或收到 Ctrl-C
    async fn watch(conn: &LiveConnection, shutdown: &CancellationToken) -> Result<()> {
        let broken = conn.broken();
        info!("👀 监督连接中，按 Ctrl-C 退出");

        tokio::select! {
            _ = broken.fired() => {
                warn!("连接已断开: {}", conn.addr());
                Err(Error::Connection(apiconn::ConnError::TransportBroken(format!(
                    "connection to {} broke",
                    conn.addr()
                ))))
            }
            _ = shutdown.cancelled() => {
                info!("收到Ctrl-C信号，关闭连接...");
                conn.close().await?;
                info!("🛑 连接已安全关闭");
                Ok(())
            }
        }
    }

    /// 显示会话信息
    fn display_session_info(conn: &LiveConnection) {
        println!("address:           {}", conn.addr());
        println!(
            "server version:    {}",
            conn.server_version()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        if let Some(tag) = conn.auth_tag() {
            println!("authenticated as:  {tag}");
        }
        if let Some(tag) = conn.controller_tag() {
            println!("controller:        {tag}");
        }
        if let Some(tag) = conn.model_tag() {
            println!("model:             {tag}");
        }
        println!("controller access: {}", conn.controller_access());
        println!("model access:      {}", conn.model_access());
        if !conn.tls_verified() {
            println!("tls:               server certificate NOT verified");
        }

        let facades = conn.all_facade_versions();
        println!("facades ({}):", facades.len());
        for (name, versions) in &facades {
            let versions: Vec<String> = versions.iter().map(ToString::to_string).collect();
            println!("  {name}: {}", versions.join(", "));
        }
    }
}

/// 设置Ctrl-C信号处理程序
fn setup_ctrl_c_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听Ctrl-C信号: {}", e);
            return;
        }
        shutdown.cancel();
    });
}
