//! 协议路由
//!
//! 每条连接一个任务：握手时从路径解析会话身份，之后把入站消息映射
//! 为引擎调用、把引擎事件映射为出站事件。套接字写出走独立的 writer
//! 任务（mpsc 解耦），慢客户端不会反压引擎。

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::hub::ConnectionRegistry;
use super::message::{ClientMessage, EventKind, ServerEvent};
use crate::error::StoreError;
use crate::model::MediaReference;
use crate::store::SessionStore;
use crate::workflow::{EventSink, FlowEngine, TurnInput, WorkflowEvent};

/// 处理一条 WebSocket 连接的完整生命周期
pub(super) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn SessionStore>,
    engine: Arc<FlowEngine>,
    heartbeat_interval: u64,
) -> Result<(), String> {
    // 握手回调里截取请求路径，拿到 /ws/{session_id}?user_id=...
    let mut request_path = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        request_path = req.uri().to_string();
        Ok(resp)
    })
    .await
    .map_err(|e| format!("WebSocket handshake failed: {}", e))?;

    let (session_id, user_id) = resolve_identity(&request_path);
    tracing::info!(%addr, session_id = %session_id, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let cancel = CancellationToken::new();

    // 会话在连接时解析或创建
    match store.get(&session_id).await {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => {
            if let Err(e) = store.create(&session_id, &user_id).await {
                let _ = send_direct(
                    &mut ws_tx,
                    ServerEvent::error(&session_id, "store_unavailable", &e.to_string(), true),
                )
                .await;
                return Err(format!("Session create failed: {}", e));
            }
        }
        Err(e) => {
            let _ = send_direct(
                &mut ws_tx,
                ServerEvent::error(&session_id, "store_unavailable", &e.to_string(), true),
            )
            .await;
            return Err(format!("Session resolve failed: {}", e));
        }
    }

    // 连接上限：终态错误，不排队
    if registry
        .register(&session_id, &user_id, tx.clone(), cancel.clone())
        .await
        .is_err()
    {
        tracing::warn!(session_id = %session_id, "Connection limit reached, rejecting");
        let _ = send_direct(
            &mut ws_tx,
            ServerEvent::error(
                &session_id,
                "connection_limit",
                "Maximum concurrent connections reached",
                false,
            ),
        )
        .await;
        let _ = ws_tx.close().await;
        return Ok(());
    }

    // writer 任务：事件通道 → 套接字
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(_) => continue,
                    };
                    if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // 心跳任务：周期 ping，与工作流活动无关
    let heartbeat_cancel = cancel.clone();
    let heartbeat_tx = tx.clone();
    let heartbeat_session = session_id.clone();
    let heartbeat = tokio::spawn(async move {
        let mut timer =
            tokio::time::interval(std::time::Duration::from_secs(heartbeat_interval.max(1)));
        timer.tick().await; // 跳过立即触发的首拍
        loop {
            tokio::select! {
                _ = heartbeat_cancel.cancelled() => break,
                _ = timer.tick() => {
                    if heartbeat_tx.send(ServerEvent::ping(&heartbeat_session)).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let _ = tx.send(ServerEvent::new(
        &session_id,
        EventKind::Connected {
            message: "Connected to talkshop orchestrator".to_string(),
        },
    ));

    // 读循环
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = ws_rx.next() => msg,
        };

        let msg = match msg {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                tracing::warn!(session_id = %session_id, "WebSocket receive error: {}", e);
                break;
            }
            None => break,
        };

        match msg {
            WsMessage::Text(text) => {
                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        let _ = tx.send(ServerEvent::error(
                            &session_id,
                            "validation_error",
                            &format!("Malformed message: {}", e),
                            false,
                        ));
                        continue;
                    }
                };

                match client_msg {
                    ClientMessage::Message { text, media } | ClientMessage::Answer { text, media } => {
                        registry.bump_message_count(&session_id).await;
                        let _ = tx.send(ServerEvent::new(
                            &session_id,
                            EventKind::Thinking {
                                message: "Processing your request...".to_string(),
                            },
                        ));
                        dispatch_turn(
                            &engine,
                            &registry,
                            &session_id,
                            &user_id,
                            text,
                            media,
                        );
                    }
                    ClientMessage::Pong { .. } => {
                        registry.touch_heartbeat(&session_id).await;
                    }
                    ClientMessage::Disconnect => {
                        tracing::info!(session_id = %session_id, "Client requested disconnect");
                        break;
                    }
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    // 断开清理：注销 + 停心跳；断点即是可恢复状态，无需额外落盘
    registry.deregister(&session_id).await;
    cancel.cancel();
    heartbeat.abort();
    writer.abort();
    tracing::info!(session_id = %session_id, %addr, "WebSocket connection closed");
    Ok(())
}

/// 为一轮输入启动引擎运行：事件经中继任务转成出站事件
///
/// 运行在独立任务中，读循环不被阻塞（队列语义由引擎的会话锁保证）。
fn dispatch_turn(
    engine: &Arc<FlowEngine>,
    registry: &Arc<ConnectionRegistry>,
    session_id: &str,
    user_id: &str,
    text: String,
    media: Vec<MediaReference>,
) {
    let turn = TurnInput {
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        message: text,
        media_refs: media,
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let event_tx: EventSink = event_tx;

    let relay_registry = Arc::clone(registry);
    let relay_session = session_id.to_string();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let outbound = map_event(&relay_session, event);
            // 客户端中途断开时静默丢弃
            relay_registry.send(&relay_session, outbound).await;
        }
    });

    let engine = Arc::clone(engine);
    tokio::spawn(async move {
        let _ = engine.run_turn(turn, &event_tx).await;
    });
}

/// 引擎事件 → 出站事件
fn map_event(session_id: &str, event: WorkflowEvent) -> ServerEvent {
    let kind = match event {
        WorkflowEvent::Progress { node, message } => EventKind::Progress {
            step: node.name().to_string(),
            message,
        },
        WorkflowEvent::Thinking { message } => EventKind::Thinking { message },
        WorkflowEvent::Token { content } => EventKind::Token { content },
        WorkflowEvent::Clarification {
            question,
            suggestions,
            context,
        } => EventKind::Clarification {
            question,
            suggestions,
            context,
        },
        WorkflowEvent::Results {
            products,
            requirement_spec,
            summary,
        } => EventKind::Results {
            products,
            requirement_spec,
            summary,
        },
        WorkflowEvent::Failed {
            code,
            message,
            recoverable,
        } => {
            return ServerEvent::error(session_id, code, &message, recoverable);
        }
        WorkflowEvent::Done { message } => EventKind::Done { message },
    };
    ServerEvent::new(session_id, kind)
}

/// 从握手路径解析会话身份：/ws/{session_id}?user_id=...
///
/// 缺省时服务端生成，`connected` 事件把最终 session_id 回传客户端。
fn resolve_identity(path: &str) -> (String, String) {
    let (path_part, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };

    let session_id = path_part
        .trim_start_matches('/')
        .strip_prefix("ws")
        .map(|rest| rest.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("sess_{}", uuid::Uuid::new_v4()));

    let user_id = query
        .and_then(|q| {
            q.split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(k, _)| *k == "user_id")
                .map(|(_, v)| v.to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "anonymous".to_string());

    (session_id, user_id)
}

async fn send_direct<S>(ws_tx: &mut S, event: ServerEvent) -> Result<(), ()>
where
    S: SinkExt<WsMessage> + Unpin,
{
    let json = serde_json::to_string(&event).map_err(|_| ())?;
    ws_tx.send(WsMessage::Text(json)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_parsed_from_path_and_query() {
        let (sid, uid) = resolve_identity("/ws/sess_abc?user_id=u42");
        assert_eq!(sid, "sess_abc");
        assert_eq!(uid, "u42");
    }

    #[test]
    fn missing_identity_is_generated() {
        let (sid, uid) = resolve_identity("/ws");
        assert!(sid.starts_with("sess_"));
        assert_eq!(uid, "anonymous");
    }

    #[test]
    fn failed_event_maps_to_error_with_recoverable_flag() {
        let ev = map_event(
            "s1",
            WorkflowEvent::Failed {
                code: "collaborator_unavailable",
                message: "search down".to_string(),
                recoverable: true,
            },
        );
        match ev.event {
            EventKind::Error {
                code, recoverable, ..
            } => {
                assert_eq!(code, "collaborator_unavailable");
                assert!(recoverable);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
