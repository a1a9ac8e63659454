//! 连接管理
//!
//! Hub 持有连接注册表并运行接入循环。注册表以 session_id 为键，
//! 进程启动时构造一次、显式传递，不做模块级全局量。超过连接上限
//! 的新连接收到终态错误后关闭，不排队。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use super::message::ServerEvent;
use super::router;
use crate::store::SessionStore;
use crate::workflow::FlowEngine;

/// Hub 配置
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// WebSocket 监听地址
    pub bind_addr: String,
    /// 最大并发连接数
    pub max_connections: usize,
    /// 心跳间隔（秒）
    pub heartbeat_interval: u64,
    /// 静默超过 interval × grace 的连接被强制关闭
    pub heartbeat_grace: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            max_connections: 1000,
            heartbeat_interval: 30,
            heartbeat_grace: 2,
        }
    }
}

/// 一条活动连接（仅存活于进程内）
struct Connection {
    #[allow(dead_code)]
    user_id: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
    #[allow(dead_code)]
    connected_at: Instant,
    last_heartbeat: Instant,
    message_count: u64,
}

/// 连接注册表（session_id → 连接）
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Connection>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// 注册连接；达到上限返回 Err，调用方应发终态错误后关闭
    pub async fn register(
        &self,
        session_id: &str,
        user_id: &str,
        tx: mpsc::UnboundedSender<ServerEvent>,
        cancel: CancellationToken,
    ) -> Result<(), &'static str> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.max_connections
            && !connections.contains_key(session_id)
        {
            return Err("connection limit reached");
        }
        // 同会话重复连接：旧连接让位
        if let Some(old) = connections.insert(
            session_id.to_string(),
            Connection {
                user_id: user_id.to_string(),
                tx,
                cancel,
                connected_at: Instant::now(),
                last_heartbeat: Instant::now(),
                message_count: 0,
            },
        ) {
            old.cancel.cancel();
        }
        Ok(())
    }

    pub async fn deregister(&self, session_id: &str) {
        self.connections.write().await.remove(session_id);
    }

    /// 发送事件；客户端已断开时静默丢弃并返回 false
    pub async fn send(&self, session_id: &str, event: ServerEvent) -> bool {
        let connections = self.connections.read().await;
        match connections.get(session_id) {
            Some(conn) => conn.tx.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn touch_heartbeat(&self, session_id: &str) {
        if let Some(conn) = self.connections.write().await.get_mut(session_id) {
            conn.last_heartbeat = Instant::now();
        }
    }

    pub async fn bump_message_count(&self, session_id: &str) {
        if let Some(conn) = self.connections.write().await.get_mut(session_id) {
            conn.message_count += 1;
        }
    }

    pub async fn is_connected(&self, session_id: &str) -> bool {
        self.connections.read().await.contains_key(session_id)
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// 清除心跳静默超限的连接，返回被关闭的会话
    pub async fn sweep_stale(&self, max_silence: Duration) -> Vec<String> {
        let mut connections = self.connections.write().await;
        let stale: Vec<String> = connections
            .iter()
            .filter(|(_, c)| c.last_heartbeat.elapsed() > max_silence)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            if let Some(conn) = connections.remove(id) {
                conn.cancel.cancel();
            }
        }
        stale
    }

    /// 停机：取消全部连接任务
    pub async fn shutdown_all(&self) {
        let mut connections = self.connections.write().await;
        for (_, conn) in connections.drain() {
            conn.cancel.cancel();
        }
    }
}

/// 网关 Hub
pub struct Hub {
    config: HubConfig,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn SessionStore>,
    engine: Arc<FlowEngine>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl Hub {
    pub fn new(config: HubConfig, store: Arc<dyn SessionStore>, engine: Arc<FlowEngine>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);
        Self {
            config,
            registry,
            store,
            engine,
            shutdown: shutdown_tx,
        }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// 启动接入循环与周期清扫
    pub async fn start(&self) -> Result<(), String> {
        let addr: SocketAddr = self
            .config
            .bind_addr
            .parse()
            .map_err(|e| format!("Invalid bind address: {}", e))?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind: {}", e))?;

        tracing::info!("Gateway listening on ws://{}", addr);

        let mut shutdown_rx = self.shutdown.subscribe();
        let registry = Arc::clone(&self.registry);
        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.engine);
        let heartbeat_interval = self.config.heartbeat_interval;
        let max_silence =
            Duration::from_secs(self.config.heartbeat_interval * self.config.heartbeat_grace as u64);

        tokio::spawn(async move {
            let mut cleanup_timer = tokio::time::interval(Duration::from_secs(60));

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = cleanup_timer.tick() => {
                        let stale = registry.sweep_stale(max_silence).await;
                        if !stale.is_empty() {
                            tracing::info!("Closed {} stale connections", stale.len());
                        }
                        let expired = store.cleanup_expired().await;
                        if expired > 0 {
                            tracing::info!("Cleaned up {} expired sessions", expired);
                        }
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                let registry = Arc::clone(&registry);
                                let store = Arc::clone(&store);
                                let engine = Arc::clone(&engine);

                                tokio::spawn(async move {
                                    if let Err(e) = router::handle_connection(
                                        stream,
                                        addr,
                                        registry,
                                        store,
                                        engine,
                                        heartbeat_interval,
                                    )
                                    .await
                                    {
                                        tracing::error!("Connection error from {}: {}", addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// 停止网关
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        self.registry.shutdown_all().await;
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::message::EventKind;

    fn channel() -> (
        mpsc::UnboundedSender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn register_rejects_past_ceiling() {
        let registry = ConnectionRegistry::new(2);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let (tx3, _rx3) = channel();

        registry
            .register("s1", "u1", tx1, CancellationToken::new())
            .await
            .unwrap();
        registry
            .register("s2", "u2", tx2, CancellationToken::new())
            .await
            .unwrap();
        assert!(registry
            .register("s3", "u3", tx3, CancellationToken::new())
            .await
            .is_err());
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn send_to_disconnected_session_is_dropped() {
        let registry = ConnectionRegistry::new(10);
        let delivered = registry
            .send("ghost", ServerEvent::ping("ghost"))
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn reconnect_replaces_and_cancels_old_connection() {
        let registry = ConnectionRegistry::new(10);
        let (tx1, _rx1) = channel();
        let (tx2, mut rx2) = channel();
        let old_cancel = CancellationToken::new();

        registry
            .register("s1", "u1", tx1, old_cancel.clone())
            .await
            .unwrap();
        registry
            .register("s1", "u1", tx2, CancellationToken::new())
            .await
            .unwrap();

        assert!(old_cancel.is_cancelled());
        assert_eq!(registry.count().await, 1);

        registry.send("s1", ServerEvent::ping("s1")).await;
        let ev = rx2.recv().await.unwrap();
        assert!(matches!(ev.event, EventKind::Ping { .. }));
    }

    #[tokio::test]
    async fn sweep_closes_silent_connections() {
        let registry = ConnectionRegistry::new(10);
        let (tx, _rx) = channel();
        let cancel = CancellationToken::new();
        registry
            .register("s1", "u1", tx, cancel.clone())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let stale = registry.sweep_stale(Duration::from_millis(10)).await;

        assert_eq!(stale, vec!["s1".to_string()]);
        assert!(cancel.is_cancelled());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn heartbeat_touch_keeps_connection_alive() {
        let registry = ConnectionRegistry::new(10);
        let (tx, _rx) = channel();
        registry
            .register("s1", "u1", tx, CancellationToken::new())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.touch_heartbeat("s1").await;
        let stale = registry.sweep_stale(Duration::from_millis(25)).await;

        assert!(stale.is_empty());
        assert_eq!(registry.count().await, 1);
    }
}
