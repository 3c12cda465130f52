//! Database - 连接与健康监督
//!
//! 启动时在重试预算内建立连接池，失败由调用方处理（启动失败即退出）。
//! 之后由监督任务定期探测，探测失败时按有界退避重建连接池。

use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::application::health::HealthMonitor;
use crate::config::DatabaseConfig;

/// 数据库连接池
pub type DbPool = Pool<Sqlite>;

/// 创建数据库连接池
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.url)
        .await?;

    // 设置 busy_timeout=5000ms，遇到锁时等待而不是立即失败
    sqlx::query("PRAGMA busy_timeout=5000")
        .execute(&pool)
        .await?;

    Ok(pool)
}

/// 探测连接是否可用
pub async fn ping(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// 数据库监督者
///
/// 持有当前连接池，重连成功后替换
#[derive(Clone)]
pub struct DatabaseSupervisor {
    config: DatabaseConfig,
    pool: Arc<RwLock<DbPool>>,
    health: HealthMonitor,
}

impl DatabaseSupervisor {
    /// 在重试预算内连接数据库
    pub async fn connect(config: DatabaseConfig, health: HealthMonitor) -> Result<Self, sqlx::Error> {
        let pool = config
            .retry
            .run("database.connect", |_| create_pool(&config))
            .await?;

        tracing::info!(url = %config.url, "Successfully connected to the database");

        Ok(Self {
            config,
            pool: Arc::new(RwLock::new(pool)),
            health,
        })
    }

    /// 当前连接池
    pub async fn pool(&self) -> DbPool {
        self.pool.read().await.clone()
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// 执行一次健康检查，失败时进行一轮有界重连
    pub async fn check(&self) {
        let pool = self.pool().await;
        let Err(e) = ping(&pool).await else {
            self.health.report_healthy();
            return;
        };

        self.health.report_degraded(format!("probe failed: {}", e));

        match self
            .config
            .retry
            .run("database.reconnect", |_| create_pool(&self.config))
            .await
        {
            Ok(new_pool) => {
                let old = std::mem::replace(&mut *self.pool.write().await, new_pool);
                old.close().await;
                self.health.report_healthy();
                tracing::info!("Reconnected to the database");
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    next_check_secs = self.config.health_check_interval_secs,
                    "Database reconnection round failed"
                );
            }
        }
    }

    /// 启动监督任务
    pub fn spawn(self) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.health_check_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.check().await;
            }
        })
    }
}
