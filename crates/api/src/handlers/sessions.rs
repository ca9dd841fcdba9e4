//! 会话通道的 WebSocket 端点
//!
//! 每个连接一个读写循环：出站消息来自会话注册表分配的有界队列，
//! 入站文本帧交给 `SessionService` 处理。

use std::net::SocketAddr;

use axum::{
    extract::{
        connect_info::ConnectInfo,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    Extension,
};
use tracing::{debug, info, warn};

use crate::routes::AppState;

pub async fn node_session(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(node_id): Path<i64>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
) -> impl IntoResponse {
    let address = connect_info.map(|Extension(ConnectInfo(addr))| addr.to_string());
    info!(node_id, "节点请求建立会话: {:?}", address);
    ws.on_upgrade(move |socket| handle_socket(socket, state, node_id, address))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    node_id: i64,
    address: Option<String>,
) {
    let mut registration = match state.sessions.on_connect(node_id, address.as_deref()).await {
        Ok(registration) => registration,
        Err(e) => {
            warn!(node_id, "登记节点会话失败: {}", e);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let generation = registration.generation;

    loop {
        tokio::select! {
            outbound = registration.receiver.recv() => {
                match outbound {
                    Some(message) => {
                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(node_id, "序列化会话消息失败: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            debug!(node_id, "发送会话消息时连接已断开");
                            break;
                        }
                    }
                    // 会话被同一节点的新连接替换
                    None => {
                        info!(node_id, "会话已被替换，关闭旧连接");
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        state.sessions.handle_text(node_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(node_id, "节点关闭会话");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(node_id, "会话读取错误: {}", e);
                        break;
                    }
                }
            }
        }
    }

    state.sessions.on_disconnect(node_id, generation).await;
    info!(node_id, "节点会话结束");
}
