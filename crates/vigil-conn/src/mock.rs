//! Scripted connector for supervisor tests. Counts live connections and
//! exposes event-injection handles so tests can drive kicks, errors, and
//! activity deterministically.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use vigil_core::BotConfig;

use crate::client::{ConnError, GameConnection, GameConnector, GameEvent};

/// Scripted outcome for one `connect` call.
#[derive(Clone, Debug)]
pub enum MockOutcome {
    /// Hand back a live connection.
    Connect,
    /// Fail synchronously; `refused: true` models ECONNREFUSED.
    Fail { refused: bool },
}

/// Handle for injecting events into the most recent mock connection.
#[derive(Clone)]
pub struct MockHandle {
    tx: mpsc::Sender<GameEvent>,
}

impl MockHandle {
    pub async fn emit(&self, event: GameEvent) {
        let _ = self.tx.send(event).await;
    }
}

pub struct MockConnection {
    live: Arc<AtomicUsize>,
    quit_called: AtomicBool,
    fail_pulses: Arc<AtomicBool>,
    pulses: Arc<AtomicUsize>,
}

#[async_trait]
impl GameConnection for MockConnection {
    async fn pulse(&self) -> Result<(), ConnError> {
        self.pulses.fetch_add(1, Ordering::SeqCst);
        if self.fail_pulses.load(Ordering::SeqCst) {
            Err(ConnError::Pulse("scripted pulse failure".into()))
        } else {
            Ok(())
        }
    }

    async fn quit(&self) {
        if !self.quit_called.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct MockConnector {
    script: Mutex<Vec<MockOutcome>>,
    handles: Mutex<Vec<MockHandle>>,
    live: Arc<AtomicUsize>,
    connects: AtomicUsize,
    auto_login: AtomicBool,
    fail_pulses: Arc<AtomicBool>,
    pulses: Arc<AtomicUsize>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
            connects: AtomicUsize::new(0),
            auto_login: AtomicBool::new(true),
            fail_pulses: Arc::new(AtomicBool::new(false)),
            pulses: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue outcomes for upcoming connect calls. When the script runs dry,
    /// connects succeed.
    pub fn script(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.script.lock().extend(outcomes);
    }

    /// Disable the automatic `LoggedIn` event after a successful connect.
    pub fn manual_login(&self) {
        self.auto_login.store(false, Ordering::SeqCst);
    }

    pub fn set_fail_pulses(&self, fail: bool) {
        self.fail_pulses.store(fail, Ordering::SeqCst);
    }

    /// Event injector for the most recent connection.
    pub fn last_handle(&self) -> Option<MockHandle> {
        self.handles.lock().last().cloned()
    }

    /// Connections handed out and not yet quit.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn pulses(&self) -> usize {
        self.pulses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GameConnector for MockConnector {
    async fn connect(
        &self,
        _config: &BotConfig,
    ) -> Result<(Arc<dyn GameConnection>, mpsc::Receiver<GameEvent>), ConnError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let outcome = {
            let mut script = self.script.lock();
            if script.is_empty() {
                MockOutcome::Connect
            } else {
                script.remove(0)
            }
        };

        match outcome {
            MockOutcome::Fail { refused } => {
                if refused {
                    Err(ConnError::Refused("scripted refusal".into()))
                } else {
                    Err(ConnError::Connect("scripted failure".into()))
                }
            }
            MockOutcome::Connect => {
                let (tx, rx) = mpsc::channel(32);
                self.live.fetch_add(1, Ordering::SeqCst);
                let conn = Arc::new(MockConnection {
                    live: Arc::clone(&self.live),
                    quit_called: AtomicBool::new(false),
                    fail_pulses: Arc::clone(&self.fail_pulses),
                    pulses: Arc::clone(&self.pulses),
                });

                if self.auto_login.load(Ordering::SeqCst) {
                    let _ = tx.send(GameEvent::LoggedIn).await;
                }
                self.handles.lock().push(MockHandle { tx });

                Ok((conn, rx))
            }
        }
    }
}
