//! 安全中间件链
//!
//! 执行顺序（外层到内层）：
//! 1. session: Session Cookie 校验与密钥轮换
//! 2. params: 重复 query 参数拒绝
//! 3. headers: 安全响应头
//! 4. cors: Origin 白名单与 CORS 响应头
//! 5. session_rejection: 第 1 步校验失败时在这里返回 401

mod cors;
mod headers;
mod params;
mod session;

pub use cors::{cors_layer, origin_guard, AllowedOrigin};
pub use headers::{with_hardening_headers, HARDENING_HEADERS};
pub use params::parameter_pollution_middleware;
pub use session::{session_middleware, session_rejection, Session, SessionUpdate};
