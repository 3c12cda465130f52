//! Infrastructure Layer - 基础设施层
//!
//! 提供端口的具体实现与 HTTP 接入

pub mod backbone;
pub mod http;
pub mod persistence;

pub use backbone::{open_redis, MemoryBus};
pub use http::{AppState, HttpServer, PipelineBuilder};
pub use persistence::DatabaseSupervisor;
