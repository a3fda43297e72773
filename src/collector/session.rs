use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Mothership-side view of one worker connection.
///
/// Created on accept, destroyed when the connection's handling task ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSession {
    pub id: u64,
    pub remote_addr: SocketAddr,

    /// Announced by the worker's `hello`
    pub worker_id: Option<String>,

    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,

    /// Frames decoded on this connection
    pub messages: usize,
}

impl WorkerSession {
    pub fn new(id: u64, remote_addr: SocketAddr) -> Self {
        let now = Utc::now();
        Self {
            id,
            remote_addr,
            worker_id: None,
            connected_at: now,
            last_activity: now,
            messages: 0,
        }
    }
}

/// Why a connection's handling task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer closed the connection
    Closed,
    /// No frame within the inactivity timeout
    TimedOut,
    /// Undecodable or oversized frame
    Protocol(String),
    /// Socket read failed
    Transport(String),
    /// Mothership shutting down
    Cancelled,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Closed => write!(f, "closed by peer"),
            SessionEnd::TimedOut => write!(f, "idle timeout"),
            SessionEnd::Protocol(e) => write!(f, "protocol error: {e}"),
            SessionEnd::Transport(e) => write!(f, "transport error: {e}"),
            SessionEnd::Cancelled => write!(f, "shutdown"),
        }
    }
}

/// Live sessions, keyed by session id.
///
/// Only connection tasks write to it; anyone holding a clone can read.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<u64, WorkerSession>>>,
}

impl SessionRegistry {
    pub(crate) async fn insert(&self, session: WorkerSession) {
        self.inner.lock().await.insert(session.id, session);
    }

    /// Record one decoded frame; returns the session's worker id.
    pub(crate) async fn touch(&self, id: u64, worker_id: Option<&str>) -> Option<String> {
        let mut sessions = self.inner.lock().await;
        let session = sessions.get_mut(&id)?;
        session.last_activity = Utc::now();
        session.messages += 1;
        if let Some(worker_id) = worker_id {
            session.worker_id = Some(worker_id.to_string());
        }
        session.worker_id.clone()
    }

    pub(crate) async fn remove(&self, id: u64) -> Option<WorkerSession> {
        self.inner.lock().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn get(&self, id: u64) -> Option<WorkerSession> {
        self.inner.lock().await.get(&id).cloned()
    }

    /// Snapshot of every live session, ordered by id.
    pub async fn snapshot(&self) -> Vec<WorkerSession> {
        let mut sessions: Vec<_> = self.inner.lock().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn touch_updates_activity_and_worker_id() {
        let registry = SessionRegistry::default();
        registry.insert(WorkerSession::new(1, addr())).await;

        assert_eq!(registry.touch(1, None).await, None);
        assert_eq!(registry.touch(1, Some("w1")).await.as_deref(), Some("w1"));
        assert_eq!(registry.touch(1, None).await.as_deref(), Some("w1"));

        let session = registry.get(1).await.unwrap();
        assert_eq!(session.messages, 3);
        assert!(session.last_activity >= session.connected_at);
    }

    #[tokio::test]
    async fn remove_destroys_session() {
        let registry = SessionRegistry::default();
        registry.insert(WorkerSession::new(1, addr())).await;
        registry.insert(WorkerSession::new(2, addr())).await;

        assert!(registry.remove(1).await.is_some());
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.snapshot().await[0].id, 2);
        assert_eq!(registry.touch(1, None).await, None);
    }
}
