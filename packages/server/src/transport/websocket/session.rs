//! Live WebSocket sessions and their outbound queues.
//!
//! The socket itself lives in the connection task; the manager only keeps the
//! sender half of each session's outbound channel, so pushing to a session
//! never touches another session's I/O.

use std::{collections::HashMap, net::SocketAddr};

use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use hostwire_shared::time::{get_timestamp_millis, millis_since};

use crate::transport::TransportError;

/// Outbound queue of one session, drained by its pusher task
pub type SessionSender = mpsc::UnboundedSender<String>;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub peer_addr: SocketAddr,
    pub authenticated: bool,
    pub connected_at: i64,
    sender: SessionSender,
}

impl Session {
    /// Milliseconds since the session connected
    pub fn uptime_millis(&self) -> i64 {
        millis_since(self.connected_at)
    }
}

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
}

fn generate_session_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("client_{}", &uuid[..8])
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new session and return its id
    pub async fn register(
        &self,
        sender: SessionSender,
        peer_addr: SocketAddr,
        authenticated: bool,
    ) -> String {
        let mut sessions = self.sessions.lock().await;
        let mut id = generate_session_id();
        while sessions.contains_key(&id) {
            id = generate_session_id();
        }

        sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                peer_addr,
                authenticated,
                connected_at: get_timestamp_millis(),
                sender,
            },
        );
        tracing::debug!(
            "Session '{}' registered for {} ({} live)",
            id,
            peer_addr,
            sessions.len()
        );
        id
    }

    pub async fn unregister(&self, session_id: &str) -> Option<Session> {
        let removed = self.sessions.lock().await.remove(session_id);
        if removed.is_some() {
            tracing::debug!("Session '{}' unregistered", session_id);
        }
        removed
    }

    pub async fn set_authenticated(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().await.get_mut(session_id) {
            session.authenticated = true;
        }
    }

    /// Queue `text` for one session; a closed queue removes the session
    pub async fn send_to_client(&self, session_id: &str, text: &str) -> Result<(), TransportError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| TransportError::SessionNotFound(session_id.to_string()))?;

        if session.sender.send(text.to_string()).is_err() {
            sessions.remove(session_id);
            tracing::warn!("Session '{}' is closed, removing it", session_id);
            return Err(TransportError::SessionNotFound(session_id.to_string()));
        }
        tracing::trace!("Queued {} bytes for session '{}'", text.len(), session_id);
        Ok(())
    }

    /// Queue `text` for every live session; returns how many accepted it
    pub async fn broadcast(&self, text: &str) -> usize {
        let mut sessions = self.sessions.lock().await;

        // ブロードキャストでは一部の送信失敗を許容し、閉じたセッションは除去する
        let mut delivered = 0;
        sessions.retain(|id, session| match session.sender.send(text.to_string()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                tracing::warn!("Session '{}' is closed, dropping it from broadcast", id);
                false
            }
        });
        delivered
    }

    pub async fn client_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Ids of all live sessions, sorted
    pub async fn connected_clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget every session, closing their outbound queues
    pub async fn clear(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let count = sessions.len();
        sessions.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - セッション ID の形式と一意性
    // - send_to_client: 特定セッションへの送信と未登録セッションのエラー
    // - broadcast: 閉じたセッションの除去と部分失敗の許容
    // ========================================

    #[tokio::test]
    async fn test_register_assigns_unique_client_ids() {
        // テスト項目: client_<8桁の16進数> 形式の一意な ID が割り当てられる
        // given (前提条件):
        let manager = SessionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        // when (操作):
        let mut ids = Vec::new();
        for _ in 0..32 {
            ids.push(manager.register(tx.clone(), peer(), true).await);
        }

        // then (期待する結果):
        for id in &ids {
            let suffix = id.strip_prefix("client_").unwrap();
            assert_eq!(suffix.len(), 8);
            assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        }
        assert_eq!(manager.client_count().await, 32);
        assert_eq!(manager.connected_clients().await.len(), 32);
    }

    #[tokio::test]
    async fn test_send_to_client() {
        // テスト項目: 指定セッションにのみ送信され、未登録 ID はエラーになる
        // given (前提条件):
        let manager = SessionManager::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = manager.register(tx_a, peer(), true).await;
        manager.register(tx_b, peer(), true).await;

        // when (操作):
        let sent = manager.send_to_client(&a, "hello").await;
        let missing = manager.send_to_client("client_deadbeef", "hello").await;

        // then (期待する結果):
        assert!(sent.is_ok());
        assert_eq!(rx_a.recv().await, Some("hello".to_string()));
        assert!(rx_b.try_recv().is_err());
        assert!(matches!(missing, Err(TransportError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_broadcast_drops_closed_sessions() {
        // テスト項目: 閉じたセッションはブロードキャスト時に除去され、他のセッションには届く
        // given (前提条件):
        let manager = SessionManager::new();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let live = manager.register(tx_live, peer(), true).await;
        manager.register(tx_dead, peer(), true).await;
        drop(rx_dead);

        // when (操作):
        let delivered = manager.broadcast("news").await;

        // then (期待する結果):
        assert_eq!(delivered, 1);
        assert_eq!(rx_live.recv().await, Some("news".to_string()));
        assert_eq!(manager.connected_clients().await, vec![live]);
    }

    #[tokio::test]
    async fn test_authentication_flag_and_unregister() {
        // テスト項目: 認証フラグの更新と登録解除
        // given (前提条件):
        let manager = SessionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = manager.register(tx, peer(), false).await;

        // when (操作):
        manager.set_authenticated(&id).await;
        let removed = manager.unregister(&id).await.unwrap();

        // then (期待する結果):
        assert!(removed.authenticated);
        assert_eq!(removed.peer_addr, peer());
        assert!(removed.uptime_millis() >= 0);
        assert_eq!(manager.client_count().await, 0);
        assert!(manager.unregister(&id).await.is_none());
    }
}
