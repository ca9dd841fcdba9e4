//! 会话通道客户端（WebSocket，JSON 文本帧）

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use fleet_core::{FleetError, FleetResult};
use fleet_domain::messaging::{NodeMessage, ServerMessage};

pub type SessionStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 一帧入站数据的解读结果
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Message(ServerMessage),
    /// 控制帧或无法解析的消息，忽略即可
    Ignored,
    Closed,
}

pub async fn connect(url: &str) -> FleetResult<SessionStream> {
    let (stream, response) = connect_async(url)
        .await
        .map_err(|e| FleetError::Network(format!("连接会话通道 {url} 失败: {e}")))?;
    info!("会话通道已连接: {} (HTTP {})", url, response.status());
    Ok(stream)
}

pub fn encode(message: &NodeMessage) -> FleetResult<Message> {
    let text = serde_json::to_string(message)?;
    Ok(Message::Text(text.into()))
}

pub fn decode(frame: Message) -> Inbound {
    match frame {
        Message::Text(text) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
            Ok(message) => Inbound::Message(message),
            Err(e) => {
                warn!("丢弃无法解析的会话消息: {}", e);
                Inbound::Ignored
            }
        },
        Message::Close(frame) => {
            debug!("服务端关闭会话: {:?}", frame);
            Inbound::Closed
        }
        _ => Inbound::Ignored,
    }
}

pub async fn send<S>(sink: &mut S, message: &NodeMessage) -> FleetResult<()>
where
    S: Sink<Message> + Unpin,
{
    let frame = encode(message)?;
    sink.send(frame)
        .await
        .map_err(|_| FleetError::Network("会话消息发送失败".to_string()))
}

/// 读取下一帧，连接错误视为关闭
pub async fn next_inbound<S>(stream: &mut S) -> Inbound
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    match stream.next().await {
        Some(Ok(frame)) => decode(frame),
        Some(Err(e)) => {
            warn!("会话读取出错: {}", e);
            Inbound::Closed
        }
        None => Inbound::Closed,
    }
}
