use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use vigil_core::BotConfig;

/// Events emitted asynchronously by a live protocol client.
#[derive(Clone, Debug)]
pub enum GameEvent {
    /// Handshake and login completed; the connection is usable.
    LoggedIn,
    /// The bot entity spawned into the world.
    Spawned,
    /// Server kicked the bot.
    Kicked { reason: String },
    /// Runtime error on the connection. `refused` marks connection refusal,
    /// which downgrades server reachability to offline.
    Errored { message: String, refused: bool },
    /// The connection closed.
    Ended { reason: String },
    /// Any in-world activity; refreshes the stale-detection clock.
    Activity { what: String },
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum ConnError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("pulse failed: {0}")]
    Pulse(String),
}

impl ConnError {
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused(_))
    }
}

/// A live connection handed back by the connector.
#[async_trait]
pub trait GameConnection: Send + Sync {
    /// Emit a low-impact presence action (a no-op look or gesture).
    async fn pulse(&self) -> Result<(), ConnError>;

    /// Forcibly terminate the connection. Idempotent.
    async fn quit(&self);
}

/// Factory for connections; the seam to the real protocol crate.
///
/// `connect` may fail synchronously; the supervisor treats that as an
/// immediate error transition plus a queued reconnect, never a
/// caller-visible failure.
#[async_trait]
pub trait GameConnector: Send + Sync {
    async fn connect(
        &self,
        config: &BotConfig,
    ) -> Result<(Arc<dyn GameConnection>, mpsc::Receiver<GameEvent>), ConnError>;
}
