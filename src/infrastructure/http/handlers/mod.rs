//! HTTP Handlers

mod health;
mod ping;
mod websocket;

pub use health::*;
pub use ping::*;
pub use websocket::*;
