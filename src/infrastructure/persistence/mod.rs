//! Persistence Layer - 数据存储连接
//!
//! 只负责连接与健康监督，表结构由业务服务维护

mod database;

pub use database::{create_pool, ping, DatabaseSupervisor, DbPool};
