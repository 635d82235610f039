//! Single-writer lifecycle actor for the one logical connection.
//!
//! Commands, protocol-client events, and timer firings all arrive through
//! one inbox, so no transition ever interleaves with another. Each
//! connection attempt gets a generation number; events and timer fires
//! carrying a stale generation are discarded, which makes transitions
//! idempotent against late callbacks and duplicate timer fires.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use vigil_core::{ConnStatus, EventLog, Phase, Reachability};
use vigil_store::Store;

use crate::client::{ConnError, GameConnection, GameConnector, GameEvent};

/// Every 5th keep-alive pulse is logged at normal visibility.
const PULSE_LOG_EVERY: u64 = 5;

/// Timer policy. Tests shrink these; production uses the defaults.
/// Reconnect and pulse intervals come from live config unless overridden.
#[derive(Clone, Debug)]
pub struct Timing {
    pub health_interval: Duration,
    pub restart_delay: Duration,
    /// Floor for the stale threshold: max(2 × pulse interval, floor).
    pub stale_floor: Duration,
    pub reconnect_override: Option<Duration>,
    pub pulse_override: Option<Duration>,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(15),
            restart_delay: Duration::from_secs(2),
            stale_floor: Duration::from_secs(90),
            reconnect_override: None,
            pulse_override: None,
        }
    }
}

/// Structured acknowledgment for start/stop/restart.
#[derive(Clone, Debug, Serialize)]
pub struct ControlAck {
    pub success: bool,
    pub message: String,
}

impl ControlAck {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

enum Msg {
    Start {
        actor: String,
        reply: oneshot::Sender<ControlAck>,
    },
    Stop {
        actor: String,
        reply: oneshot::Sender<ControlAck>,
    },
    Connected {
        generation: u64,
        conn: Arc<dyn GameConnection>,
        events: mpsc::Receiver<GameEvent>,
    },
    ConnectFailed {
        generation: u64,
        error: ConnError,
    },
    Game {
        generation: u64,
        event: GameEvent,
    },
    ReconnectFired {
        timer: u64,
    },
    PulseTick,
    PulseOk {
        generation: u64,
    },
    HealthTick,
}

/// Cloneable handle to the supervisor: commands in, snapshots out.
#[derive(Clone)]
pub struct ConnHandle {
    tx: mpsc::Sender<Msg>,
    status: Arc<RwLock<ConnStatus>>,
    restart_delay: Duration,
}

impl ConnHandle {
    pub async fn start(&self, actor: &str) -> ControlAck {
        self.command(|reply| Msg::Start {
            actor: actor.to_string(),
            reply,
        })
        .await
    }

    pub async fn stop(&self, actor: &str) -> ControlAck {
        self.command(|reply| Msg::Stop {
            actor: actor.to_string(),
            reply,
        })
        .await
    }

    /// Stop, wait a fixed delay, start — a composition, not a state.
    /// A failed stop (already stopped) does not abort the restart.
    pub async fn restart(&self, actor: &str) -> ControlAck {
        let _ = self.stop(actor).await;
        tokio::time::sleep(self.restart_delay).await;
        let start = self.start(actor).await;
        if start.success {
            ControlAck::ok("restarted")
        } else {
            start
        }
    }

    pub fn status(&self) -> ConnStatus {
        self.status.read().clone()
    }

    async fn command(&self, make: impl FnOnce(oneshot::Sender<ControlAck>) -> Msg) -> ControlAck {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(make(reply_tx)).await.is_err() {
            return ControlAck::fail("connection controller unavailable");
        }
        reply_rx
            .await
            .unwrap_or_else(|_| ControlAck::fail("connection controller unavailable"))
    }
}

/// The actor. Owns all mutable connection state; nothing outside this task
/// touches it.
pub struct Supervisor {
    connector: Arc<dyn GameConnector>,
    store: Arc<Store>,
    log: Arc<EventLog>,
    timing: Timing,
    shared: Arc<RwLock<ConnStatus>>,
    tx: mpsc::Sender<Msg>,

    desired: bool,
    phase: Phase,
    reachability: Reachability,
    attempts: u32,
    last_activity: Option<chrono::DateTime<Utc>>,
    session_started: Option<chrono::DateTime<Utc>>,
    pulses: u64,

    conn: Option<Arc<dyn GameConnection>>,
    /// Bumped on every attempt and teardown; stale-generation messages are
    /// dropped, which detaches old listeners without explicit unsubscription.
    generation: u64,
    connect_in_flight: bool,
    pending_reconnect: Option<(u64, CancellationToken)>,
    reconnect_timer_seq: u64,
    pulse_cancel: Option<CancellationToken>,
}

impl Supervisor {
    pub fn spawn(
        connector: Arc<dyn GameConnector>,
        store: Arc<Store>,
        log: Arc<EventLog>,
        timing: Timing,
    ) -> ConnHandle {
        let (tx, rx) = mpsc::channel(64);
        let shared = Arc::new(RwLock::new(ConnStatus::default()));

        // Health sweep ticks for the life of the actor
        let health_tx = tx.clone();
        let health_interval = timing.health_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if health_tx.send(Msg::HealthTick).await.is_err() {
                            break;
                        }
                    }
                    () = health_tx.closed() => break,
                }
            }
        });

        let handle = ConnHandle {
            tx: tx.clone(),
            status: Arc::clone(&shared),
            restart_delay: timing.restart_delay,
        };

        let actor = Self {
            connector,
            store,
            log,
            timing,
            shared,
            tx,
            desired: false,
            phase: Phase::Stopped,
            reachability: Reachability::Unknown,
            attempts: 0,
            last_activity: None,
            session_started: None,
            pulses: 0,
            conn: None,
            generation: 0,
            connect_in_flight: false,
            pending_reconnect: None,
            reconnect_timer_seq: 0,
            pulse_cancel: None,
        };
        tokio::spawn(actor.run(rx));

        handle
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Msg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Start { actor, reply } => {
                    let _ = reply.send(self.handle_start(&actor));
                }
                Msg::Stop { actor, reply } => {
                    let _ = reply.send(self.handle_stop(&actor));
                }
                Msg::Connected {
                    generation,
                    conn,
                    events,
                } => self.handle_connected(generation, conn, events),
                Msg::ConnectFailed { generation, error } => {
                    self.handle_connect_failed(generation, &error);
                }
                Msg::Game { generation, event } => self.handle_game(generation, event),
                Msg::ReconnectFired { timer } => self.handle_reconnect_fired(timer),
                Msg::PulseTick => self.handle_pulse_tick(),
                Msg::PulseOk { generation } => {
                    if generation == self.generation {
                        self.last_activity = Some(Utc::now());
                        self.publish();
                    }
                }
                Msg::HealthTick => self.handle_health_tick(),
            }
        }
    }

    // ── Command transitions ──

    fn handle_start(&mut self, actor: &str) -> ControlAck {
        if self.desired {
            return ControlAck::fail("already running");
        }
        self.desired = true;
        self.attempts = 0;
        self.pulses = 0;
        self.last_activity = Some(Utc::now());
        self.session_started = Some(Utc::now());
        self.log.info(format!("Connection started by {actor}"));
        self.attempt_connect();
        ControlAck::ok("starting")
    }

    fn handle_stop(&mut self, actor: &str) -> ControlAck {
        if !self.desired {
            return ControlAck::fail("already stopped");
        }
        self.desired = false;

        // A stale timer must never revive a stopped connection: cancel it
        // before the stop is acknowledged.
        if let Some((_, token)) = self.pending_reconnect.take() {
            token.cancel();
        }
        self.stop_pulse_loop();
        self.teardown_connection();
        self.connect_in_flight = false;

        self.phase = Phase::Stopped;
        self.reachability = Reachability::Unknown;
        self.session_started = None;
        self.log.info(format!("Connection stopped by {actor}"));
        self.publish();
        ControlAck::ok("stopped")
    }

    // ── Connection attempts ──

    fn attempt_connect(&mut self) {
        // A retry can arrive while a previous client is still held, e.g. a
        // connect that never progressed to login. Quit it before a new one
        // exists; teardown also bumps the generation for this attempt.
        self.teardown_connection();
        self.connect_in_flight = true;
        self.phase = Phase::Connecting;
        self.publish();

        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let config = self.store.config();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let msg = match connector.connect(&config).await {
                Ok((conn, events)) => Msg::Connected {
                    generation,
                    conn,
                    events,
                },
                Err(error) => Msg::ConnectFailed { generation, error },
            };
            let _ = tx.send(msg).await;
        });
    }

    fn handle_connected(
        &mut self,
        generation: u64,
        conn: Arc<dyn GameConnection>,
        mut events: mpsc::Receiver<GameEvent>,
    ) {
        if generation != self.generation || !self.desired {
            // A newer attempt superseded this one, or we were stopped
            // while connecting. Discard the orphan.
            tokio::spawn(async move { conn.quit().await });
            return;
        }
        self.connect_in_flight = false;
        self.conn = Some(conn);

        let tx = self.tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(Msg::Game { generation, event }).await.is_err() {
                    break;
                }
            }
        });
    }

    fn handle_connect_failed(&mut self, generation: u64, error: &ConnError) {
        if generation != self.generation {
            return;
        }
        self.connect_in_flight = false;
        if !self.desired {
            return;
        }
        self.phase = Phase::Error;
        if error.is_refused() {
            self.reachability = Reachability::Offline;
        }
        self.log.error(format!("Connection attempt failed: {error}"));
        self.queue_reconnect();
        self.publish();
    }

    // ── Protocol-client events ──

    fn handle_game(&mut self, generation: u64, event: GameEvent) {
        if generation != self.generation {
            return;
        }
        match event {
            GameEvent::LoggedIn => {
                self.phase = Phase::Online;
                self.reachability = Reachability::Online;
                self.attempts = 0;
                self.last_activity = Some(Utc::now());
                self.log.info("Logged in to server");
                self.start_pulse_loop();
                self.publish();
            }
            GameEvent::Spawned => {
                self.last_activity = Some(Utc::now());
                self.log.info("Spawned in world");
                self.publish();
            }
            GameEvent::Activity { .. } => {
                self.last_activity = Some(Utc::now());
                self.publish();
            }
            GameEvent::Kicked { reason } => {
                self.log.error(format!("Kicked from server: {reason}"));
                self.handle_disconnect(false);
            }
            GameEvent::Errored { message, refused } => {
                self.log.error(format!("Connection error: {message}"));
                self.handle_disconnect(refused);
            }
            GameEvent::Ended { reason } => {
                self.log.warn(format!("Connection ended: {reason}"));
                self.handle_disconnect(false);
            }
        }
    }

    fn handle_disconnect(&mut self, refused: bool) {
        self.stop_pulse_loop();
        self.teardown_connection();

        if refused {
            self.reachability = Reachability::Offline;
        }

        if self.desired {
            self.phase = Phase::Error;
            self.queue_reconnect();
        } else {
            self.phase = Phase::Stopped;
        }
        self.publish();
    }

    // ── Reconnect queueing ──

    /// At most one pending reconnect timer; a second request is a no-op.
    fn queue_reconnect(&mut self) {
        if self.pending_reconnect.is_some() {
            return;
        }
        self.reconnect_timer_seq += 1;
        let timer = self.reconnect_timer_seq;
        let token = CancellationToken::new();
        let delay = self.reconnect_delay();
        let tx = self.tx.clone();
        let task_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = task_token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(Msg::ReconnectFired { timer }).await;
                }
            }
        });
        self.pending_reconnect = Some((timer, token));
        self.log
            .info(format!("Reconnecting in {:.1}s", delay.as_secs_f64()));
    }

    fn handle_reconnect_fired(&mut self, timer: u64) {
        match self.pending_reconnect {
            Some((pending, _)) if pending == timer => {
                self.pending_reconnect = None;
            }
            _ => return, // cancelled or superseded
        }
        if !self.desired {
            return;
        }
        self.attempts += 1;
        self.attempt_connect();
    }

    fn reconnect_delay(&self) -> Duration {
        self.timing
            .reconnect_override
            .unwrap_or_else(|| Duration::from_secs(self.store.config().reconnect_delay_secs))
    }

    // ── Keep-alive pulse ──

    fn pulse_interval(&self) -> Duration {
        self.timing
            .pulse_override
            .unwrap_or_else(|| Duration::from_secs(self.store.config().ping_interval_secs))
    }

    fn start_pulse_loop(&mut self) {
        self.stop_pulse_loop();
        let token = CancellationToken::new();
        let task_token = token.clone();
        let interval = self.pulse_interval();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(Msg::PulseTick).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        self.pulse_cancel = Some(token);
    }

    fn stop_pulse_loop(&mut self) {
        if let Some(token) = self.pulse_cancel.take() {
            token.cancel();
        }
    }

    fn handle_pulse_tick(&mut self) {
        if self.phase != Phase::Online {
            return;
        }
        let Some(conn) = self.conn.clone() else {
            return;
        };

        self.pulses += 1;
        if self.pulses % PULSE_LOG_EVERY == 0 {
            self.log.info(format!("Keep-alive pulse #{}", self.pulses));
        }

        let generation = self.generation;
        let tx = self.tx.clone();
        let log = Arc::clone(&self.log);
        tokio::spawn(async move {
            match conn.pulse().await {
                Ok(()) => {
                    let _ = tx.send(Msg::PulseOk { generation }).await;
                }
                Err(e) => {
                    // A failed pulse is a warning, never a phase change
                    log.warn(format!("Keep-alive pulse failed: {e}"));
                }
            }
        });
        self.publish();
    }

    // ── Health monitor ──

    fn stale_threshold(&self) -> Duration {
        std::cmp::max(self.pulse_interval() * 2, self.timing.stale_floor)
    }

    /// Self-healing sweep: (a) recycle online-but-silent connections, a
    /// common idle-kick precursor; (b) requeue a reconnect if one was lost.
    fn handle_health_tick(&mut self) {
        if !self.desired {
            return;
        }

        if self.phase == Phase::Online {
            let stale = self
                .last_activity
                .map(|at| {
                    Utc::now().signed_duration_since(at).to_std().unwrap_or_default()
                        > self.stale_threshold()
                })
                .unwrap_or(false);
            if stale {
                self.log.warn(format!(
                    "No activity for over {}s, recycling connection",
                    self.stale_threshold().as_secs()
                ));
                self.stop_pulse_loop();
                self.teardown_connection();
                self.phase = Phase::Error;
                self.reachability = Reachability::Unknown;
                self.queue_reconnect();
                self.publish();
                return;
            }
        }

        if matches!(self.phase, Phase::Error | Phase::Connecting)
            && self.pending_reconnect.is_none()
            && !self.connect_in_flight
        {
            self.log.warn("Reconnect attempt lost, requeueing");
            self.queue_reconnect();
        }
    }

    // ── Shared plumbing ──

    /// Drop the current connection, quitting it in the background and
    /// bumping the generation so its remaining events are discarded.
    fn teardown_connection(&mut self) {
        self.generation += 1;
        if let Some(conn) = self.conn.take() {
            tokio::spawn(async move { conn.quit().await });
        }
    }

    fn publish(&self) {
        let snapshot = ConnStatus {
            running: self.desired,
            phase: self.phase,
            reachability: self.reachability,
            attempts: self.attempts,
            last_activity: self.last_activity,
            session_started: self.session_started,
            pulses: self.pulses,
        };
        *self.shared.write() = snapshot.clone();
        self.log.publish_status(snapshot);
    }
}
