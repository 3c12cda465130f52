//! WebSocket Handler
//!
//! 每个 socket 对应一个 Gateway `Connection`：
//! - 转发任务：`Connection::recv()` -> `message` 帧
//! - 接收任务：客户端帧 -> join/leave/publish，结果以 `joined`/`left`/`error` 帧回复
//!
//! 任一任务结束，或连接因投递队列写满被驱逐，即断开连接。

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::application::{ClassifiedError, Connection};
use crate::infrastructure::http::dto::{ClientFrame, ServerFrame};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

type SocketSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// 关闭帧发送超时，对端不读数据时不再等待
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// `GET /ws` 升级
///
/// Origin 或 Session Cookie 无效时在升级前返回 401
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let connection = state.gateway.accept(&headers)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, connection)))
}

async fn handle_socket(socket: WebSocket, connection: Connection) {
    let connection = Arc::new(connection);
    let connection_id = connection.id();
    let (sender, mut receiver) = socket.split();
    let sink: SocketSink = Arc::new(Mutex::new(sender));

    if send_frame(&sink, &ServerFrame::Connected { connection_id }).await.is_err() {
        connection.disconnect().await;
        return;
    }

    tracing::info!(connection_id = %connection_id, "WebSocket connected");

    // 消息转发任务
    let forward_connection = connection.clone();
    let forward_sink = sink.clone();
    let mut forward_task = tokio::spawn(async move {
        while let Some(delivery) = forward_connection.recv().await {
            if let Err(e) = send_frame(&forward_sink, &ServerFrame::Message(delivery)).await {
                tracing::debug!(
                    connection_id = %forward_connection.id(),
                    error = %e,
                    "Failed to send WebSocket message"
                );
                break;
            }
        }
    });

    // 接收客户端帧
    let receive_connection = connection.clone();
    let receive_sink = sink.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let reply = match msg {
                Ok(Message::Text(text)) => handle_text(&receive_connection, &text).await,
                Ok(Message::Binary(_)) => Some(error_frame(ClassifiedError::bad_request(
                    "Binary frames are not supported",
                ))),
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %receive_connection.id(), "WebSocket closed by client");
                    break;
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(connection_id = %receive_connection.id(), error = %e, "WebSocket error");
                    break;
                }
            };

            if let Some(reply) = reply {
                if send_frame(&receive_sink, &reply).await.is_err() {
                    break;
                }
            }
        }
    });

    // 等待任一任务完成
    tokio::select! {
        _ = &mut forward_task => receive_task.abort(),
        _ = &mut receive_task => forward_task.abort(),
        _ = connection.evicted() => {
            tracing::warn!(connection_id = %connection_id, "Closing evicted WebSocket");
            forward_task.abort();
            receive_task.abort();
        }
    }

    connection.disconnect().await;
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
        let _ = sink.lock().await.close().await;
    })
    .await;
    tracing::info!(connection_id = %connection_id, "WebSocket disconnected");
}

/// 处理一条文本帧，返回需要回复的帧
async fn handle_text(connection: &Connection, text: &str) -> Option<ServerFrame> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(connection_id = %connection.id(), error = %e, "Malformed frame");
            return Some(error_frame(ClassifiedError::bad_request(format!(
                "Malformed frame: {}",
                e
            ))));
        }
    };

    let result = match frame {
        ClientFrame::Join { topic } => connection
            .join(&topic)
            .await
            .map(|_| Some(ServerFrame::Joined { topic })),
        ClientFrame::Leave { topic } => connection
            .leave(&topic)
            .await
            .map(|_| Some(ServerFrame::Left { topic })),
        ClientFrame::Publish { topic, payload } => {
            connection.publish(&topic, payload).await.map(|_| None)
        }
    };

    result.unwrap_or_else(|e| Some(error_frame(e.into())))
}

fn error_frame(error: ClassifiedError) -> ServerFrame {
    ServerFrame::Error(error.serialize())
}

async fn send_frame(sink: &SocketSink, frame: &ServerFrame) -> Result<(), axum::Error> {
    let json = match frame.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize frame");
            return Ok(());
        }
    };
    sink.lock().await.send(Message::Text(json)).await
}
