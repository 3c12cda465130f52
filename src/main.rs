//! Chatty - 多实例实时连接网关
//!
//! 启动失败时以退出码 1 结束

use std::path::Path;
use std::process::ExitCode;

use chatty::application::HealthMonitor;
use chatty::config::{load_config, print_config, AppConfig, LogConfig};
use chatty::infrastructure::DatabaseSupervisor;
use chatty::Bootstrap;

fn init_tracing(log: &LogConfig) {
    let log_filter = format!("{},chatty={},tower_http=debug", log.level, log.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter));

    if log.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// sqlite 文件所在目录
fn sqlite_parent_dir(url: &str) -> Option<&Path> {
    let path = url.strip_prefix("sqlite:")?.trim_start_matches("//");
    let path = path.split('?').next()?;
    if path.is_empty() || path.starts_with(':') {
        return None;
    }
    Path::new(path).parent().filter(|p| !p.as_os_str().is_empty())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 确保数据目录存在
    if let Some(dir) = sqlite_parent_dir(&config.database.url) {
        tokio::fs::create_dir_all(dir).await?;
    }

    // 数据库连接失败是致命错误
    let database_health = HealthMonitor::new("database");
    let supervisor = DatabaseSupervisor::connect(config.database.clone(), database_health.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to the database: {}", e))?;
    supervisor.spawn();

    Bootstrap::new(config)
        .with_database_health(database_health)
        .run(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.log);
    tracing::info!("Chatty gateway starting");
    print_config(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal startup error");
            ExitCode::FAILURE
        }
    }
}
