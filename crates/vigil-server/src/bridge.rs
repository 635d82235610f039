//! Bridges the event log's broadcast channel onto the observer registry.
//!
//! Every status change and log entry published through the `EventLog`
//! becomes a JSON frame pushed to all connected observers.

use std::sync::Arc;

use tokio::sync::broadcast;

use vigil_core::EventLog;

use crate::ws::ClientRegistry;

/// Spawn the fan-out task. Runs until the event log's channel closes.
pub fn start_event_bridge(
    log: Arc<EventLog>,
    registry: Arc<ClientRegistry>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = log.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => registry.broadcast_all(&json),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize control event");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event bridge lagged, observers missed events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vigil_core::SessionId;

    #[tokio::test]
    async fn log_entries_fan_out_to_observers() {
        let log = Arc::new(EventLog::new(100));
        let registry = Arc::new(ClientRegistry::new(32));
        let (_id, mut rx) = registry.register("alice", SessionId::new());

        let _bridge = start_event_bridge(Arc::clone(&log), Arc::clone(&registry));
        tokio::time::sleep(Duration::from_millis(20)).await;

        log.info("connection established");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let frame = rx.try_recv().expect("observer should receive the event");
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["entry"]["message"], "connection established");
    }

    #[tokio::test]
    async fn status_updates_fan_out_to_observers() {
        let log = Arc::new(EventLog::new(100));
        let registry = Arc::new(ClientRegistry::new(32));
        let (_id, mut rx) = registry.register("bob", SessionId::new());

        let _bridge = start_event_bridge(Arc::clone(&log), Arc::clone(&registry));
        tokio::time::sleep(Duration::from_millis(20)).await;

        log.publish_status(vigil_core::ConnStatus::default());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let frame = rx.try_recv().expect("observer should receive the status");
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"]["running"], false);
    }
}
