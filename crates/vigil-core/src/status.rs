use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed lifecycle state of the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Stopped,
    Connecting,
    Online,
    Error,
}

/// Best-known reachability of the remote server, updated from failure causes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Unknown,
    Online,
    Offline,
}

/// Point-in-time snapshot of the singleton connection record.
///
/// Written only by the connection supervisor; everyone else reads copies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnStatus {
    /// Operator intent: should the connection be running.
    pub running: bool,
    pub phase: Phase,
    pub reachability: Reachability,
    /// Reconnect attempts since the last successful login.
    pub attempts: u32,
    pub last_activity: Option<DateTime<Utc>>,
    /// Set when intent flips stopped→running, cleared on stop.
    pub session_started: Option<DateTime<Utc>>,
    /// Keep-alive pulses emitted during the current online stretch.
    pub pulses: u64,
}

impl Default for ConnStatus {
    fn default() -> Self {
        Self {
            running: false,
            phase: Phase::Stopped,
            reachability: Reachability::Unknown,
            attempts: 0,
            last_activity: None,
            session_started: None,
            pulses: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_stopped_and_unknown() {
        let s = ConnStatus::default();
        assert!(!s.running);
        assert_eq!(s.phase, Phase::Stopped);
        assert_eq!(s.reachability, Reachability::Unknown);
        assert_eq!(s.attempts, 0);
        assert!(s.session_started.is_none());
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Phase::Online).unwrap(), "\"online\"");
        assert_eq!(
            serde_json::to_string(&Reachability::Offline).unwrap(),
            "\"offline\""
        );
    }

    #[test]
    fn snapshot_serde_roundtrip() {
        let mut s = ConnStatus::default();
        s.running = true;
        s.phase = Phase::Connecting;
        s.attempts = 3;
        let json = serde_json::to_string(&s).unwrap();
        let parsed: ConnStatus = serde_json::from_str(&json).unwrap();
        assert!(parsed.running);
        assert_eq!(parsed.phase, Phase::Connecting);
        assert_eq!(parsed.attempts, 3);
    }
}
