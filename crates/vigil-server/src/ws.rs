//! WebSocket observer registry and realtime message handling.
//!
//! Observers are admitted with a valid session and keep its handle; every
//! inbound control action re-resolves the session so revocations and role
//! changes take effect immediately. A denied action gets an error
//! acknowledgment, never a disconnect.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use vigil_conn::ConnHandle;
use vigil_core::{Capability, SessionId};
use vigil_store::Store;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const OBSERVER_TIMEOUT: Duration = Duration::from_secs(90);

/// Unique observer identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("obs_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An admitted observer. The session handle is kept so control actions can
/// re-check live credentials; name is display-only.
pub struct Observer {
    pub id: ClientId,
    pub user_name: String,
    pub session: SessionId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Observer {
    fn new(id: ClientId, user_name: String, session: SessionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            user_name,
            session,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < OBSERVER_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all admitted observers.
pub struct ClientRegistry {
    observers: DashMap<ClientId, Arc<Observer>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            observers: DashMap::new(),
            max_send_queue,
        }
    }

    /// Admit an observer with its resolved identity and session handle.
    pub fn register(
        &self,
        user_name: &str,
        session: SessionId,
    ) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let observer = Arc::new(Observer::new(id.clone(), user_name.to_string(), session, tx));
        self.observers.insert(id.clone(), observer);
        (id, rx)
    }

    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, observer)) = self.observers.remove(id) {
            observer.connected.store(false, Ordering::Relaxed);
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<Observer>> {
        self.observers.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Send to one observer. A full queue drops the message with a warning.
    pub fn send_to(&self, id: &ClientId, message: String) -> bool {
        let Some(observer) = self.observers.get(id) else {
            return false;
        };
        match observer.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %id,
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Push a message to every connected observer.
    pub fn broadcast_all(&self, message: &str) {
        for entry in self.observers.iter() {
            let observer = entry.value();
            if observer.is_connected() {
                let _ = observer.tx.try_send(message.to_string());
            }
        }
    }

    pub fn count(&self) -> usize {
        self.observers.len()
    }

    /// Remove observers that have not answered pings within the timeout.
    pub fn cleanup_dead(&self) -> usize {
        let dead: Vec<ClientId> = self
            .observers
            .iter()
            .filter(|e| !e.value().is_alive())
            .map(|e| e.value().id.clone())
            .collect();
        let removed = dead.len();
        for id in dead {
            self.unregister(&id);
            tracing::info!(client_id = %id, "Cleaned up dead observer");
        }
        removed
    }
}

/// Start a background task that periodically cleans up dead observers.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead();
            if removed > 0 {
                tracing::info!(removed = removed, "Dead observer cleanup");
            }
        }
    })
}

/// Run a WebSocket connection: writer forwards queued messages plus
/// heartbeat pings, reader feeds inbound control messages to the processor.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(observer) = writer_registry.get(&writer_cid) {
            observer.connected.store(false, Ordering::Relaxed);
        }
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_message.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Pong(_) => {
                    if let Some(observer) = reader_registry.get(&reader_cid) {
                        observer.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pongs automatically
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id);
}

/// Inbound control message from an observer.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub action: String,
}

/// Process inbound observer messages: re-resolve the observer's session,
/// permission-check the action against the current role, route to the
/// supervisor, acknowledge.
pub async fn process_control_messages(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    registry: Arc<ClientRegistry>,
    store: Arc<Store>,
    conn: ConnHandle,
) {
    while let Some((client_id, raw)) = rx.recv().await {
        let Some(observer) = registry.get(&client_id) else {
            continue;
        };

        let message: ClientMessage = match serde_json::from_str(&raw) {
            Ok(m) => m,
            Err(_) => {
                let err = error_message("INVALID_INPUT", "malformed message");
                registry.send_to(&client_id, err);
                continue;
            }
        };

        // Admission-time credentials go stale; check against the store on
        // every action so revocations bite immediately.
        let Some((user, _session)) = store.resolve(&observer.session) else {
            let err = error_message("UNAUTHORIZED", "session expired or revoked");
            registry.send_to(&client_id, err);
            continue;
        };

        if !user.role.can(Capability::ControlConnection) {
            let err = error_message("FORBIDDEN", "insufficient role for this operation");
            registry.send_to(&client_id, err);
            continue;
        }

        let ack = match message.action.as_str() {
            "start" => conn.start(&user.name).await,
            "stop" => conn.stop(&user.name).await,
            "restart" => conn.restart(&user.name).await,
            other => {
                let err = error_message("INVALID_INPUT", &format!("unknown action: {other}"));
                registry.send_to(&client_id, err);
                continue;
            }
        };

        let result = serde_json::json!({
            "type": "actionResult",
            "action": message.action,
            "success": ack.success,
            "message": ack.message,
        });
        if let Ok(json) = serde_json::to_string(&result) {
            registry.send_to(&client_id, json);
        }
    }
}

pub fn error_message(code: &str, message: &str) -> String {
    serde_json::json!({
        "type": "error",
        "error": { "code": code, "message": message },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_conn::mock::MockConnector;
    use vigil_conn::{Supervisor, Timing};
    use vigil_core::{EventLog, Role};

    #[test]
    fn client_id_unique_and_prefixed() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
        assert!(a.0.starts_with("obs_"));
    }

    #[test]
    fn registry_register_and_unregister() {
        let registry = ClientRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register("alice", SessionId::new());
        let (id2, _rx2) = registry.register("bob", SessionId::new());
        assert_eq!(registry.count(), 2);

        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);
        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn broadcast_reaches_everyone() {
        let registry = ClientRegistry::new(32);
        let (_id1, mut rx1) = registry.register("alice", SessionId::new());
        let (_id2, mut rx2) = registry.register("bob", SessionId::new());

        registry.broadcast_all("hello");
        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");
    }

    #[test]
    fn send_to_specific_observer() {
        let registry = ClientRegistry::new(32);
        let (id, mut rx) = registry.register("alice", SessionId::new());
        assert!(registry.send_to(&id, "just you".into()));
        assert_eq!(rx.try_recv().unwrap(), "just you");

        let ghost = ClientId::new();
        assert!(!registry.send_to(&ghost, "nobody".into()));
    }

    #[test]
    fn full_queue_drops_message() {
        let registry = ClientRegistry::new(2);
        let (id, _rx) = registry.register("alice", SessionId::new());
        assert!(registry.send_to(&id, "1".into()));
        assert!(registry.send_to(&id, "2".into()));
        assert!(!registry.send_to(&id, "3".into()));
    }

    #[test]
    fn cleanup_removes_silent_observers() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register("alice", SessionId::new());
        registry
            .get(&id)
            .unwrap()
            .last_pong
            .store(0, Ordering::Relaxed);

        let removed = registry.cleanup_dead();
        assert_eq!(removed, 1);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn observer_pong_tracking() {
        let registry = ClientRegistry::new(8);
        let (id, _rx) = registry.register("alice", SessionId::new());
        let observer = registry.get(&id).unwrap();
        assert!(observer.is_alive());
        observer.record_pong();
        assert!(observer.is_alive());
    }

    #[test]
    fn error_message_shape() {
        let msg = error_message("FORBIDDEN", "nope");
        let json: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["code"], "FORBIDDEN");
    }

    struct ControlHarness {
        store: Arc<Store>,
        registry: Arc<ClientRegistry>,
        tx: mpsc::Sender<(ClientId, String)>,
    }

    fn spawn_control_processor() -> ControlHarness {
        let store = Arc::new(Store::in_memory());
        store.ensure_admin(Some("admintoken".into()));
        let registry = Arc::new(ClientRegistry::new(32));
        let log = Arc::new(EventLog::new(32));
        let conn = Supervisor::spawn(
            Arc::new(MockConnector::new()),
            Arc::clone(&store),
            log,
            Timing::default(),
        );

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(process_control_messages(
            rx,
            Arc::clone(&registry),
            Arc::clone(&store),
            conn,
        ));
        ControlHarness {
            store,
            registry,
            tx,
        }
    }

    #[tokio::test]
    async fn control_action_acks_for_authorized_session() {
        let h = spawn_control_processor();
        let (session, _) = h.store.login("admintoken").unwrap();
        let (id, mut rx) = h.registry.register("admin", session.id);

        h.tx.send((id, r#"{"action":"start"}"#.into())).await.unwrap();
        let frame = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "actionResult");
        assert_eq!(json["action"], "start");
        assert_eq!(json["success"], true);
    }

    #[tokio::test]
    async fn viewer_action_gets_forbidden_ack() {
        let h = spawn_control_processor();
        let viewer = h
            .store
            .create_user("watcher", Role::Viewer, Some("vtok".into()))
            .unwrap();
        assert_eq!(viewer.role, Role::Viewer);
        let (session, _) = h.store.login("vtok").unwrap();
        let (id, mut rx) = h.registry.register("watcher", session.id);

        h.tx.send((id, r#"{"action":"start"}"#.into())).await.unwrap();
        let frame = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn revoked_session_loses_control_mid_connection() {
        let h = spawn_control_processor();
        let operator = h
            .store
            .create_user("ops", Role::Operator, Some("otok".into()))
            .unwrap();
        let (session, _) = h.store.login("otok").unwrap();
        let (id, mut rx) = h.registry.register("ops", session.id);

        h.tx.send((id.clone(), r#"{"action":"start"}"#.into()))
            .await
            .unwrap();
        let frame = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["success"], true);

        // Demotion revokes the operator's sessions; the already-admitted
        // observer must lose control on its very next action.
        h.store
            .update_user(
                &operator.id,
                &vigil_store::UserPatch {
                    role: Some(Role::Viewer),
                    ..Default::default()
                },
                &h.store.authenticate("admintoken").unwrap().id,
            )
            .unwrap();

        h.tx.send((id, r#"{"action":"stop"}"#.into())).await.unwrap();
        let frame = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");
    }
}
