//! Credential & session store: role-tagged users with long-lived tokens,
//! ephemeral sliding-expiry sessions, and the persisted state file holding
//! config plus the user list. Sessions are in-memory only and do not
//! survive a restart.

pub mod error;
pub mod persist;
pub mod sessions;
pub mod users;

pub use error::StoreError;
pub use persist::PersistedState;
pub use sessions::{Session, SESSION_TTL};
pub use users::{User, UserPatch};

use std::path::PathBuf;

use dashmap::DashMap;
use parking_lot::RwLock;
use vigil_core::{BotConfig, ConfigPatch, SessionId};

/// Owns the persisted state (config + users) and the ephemeral session map.
///
/// All mutations go through `&self` methods; persisted-state writes hold the
/// `state` lock only for the in-memory change, then snapshot and save.
/// A save failure is logged and the in-memory state stays authoritative.
pub struct Store {
    path: Option<PathBuf>,
    state: RwLock<PersistedState>,
    sessions: DashMap<SessionId, Session>,
}

impl Store {
    /// Open the store backed by a state file. A missing or unreadable file
    /// falls back to defaults rather than refusing to start.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = persist::load(&path);
        Self {
            path: Some(path),
            state: RwLock::new(state),
            sessions: DashMap::new(),
        }
    }

    /// In-memory store for tests; nothing is persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(PersistedState::default()),
            sessions: DashMap::new(),
        }
    }

    pub fn config(&self) -> BotConfig {
        self.state.read().config.clone()
    }

    /// Merge a partial update onto the current config and persist.
    pub fn update_config(&self, patch: &ConfigPatch) -> Result<BotConfig, vigil_core::ApiError> {
        let next = self
            .config()
            .apply(patch)
            .map_err(vigil_core::ApiError::InvalidInput)?;
        self.state.write().config = next.clone();
        self.persist();
        Ok(next)
    }

    /// Write the current state to disk, if a path is configured.
    pub(crate) fn persist(&self) {
        let Some(ref path) = self.path else {
            return;
        };
        let snapshot = self.state.read().clone();
        if let Err(e) = persist::save(path, &snapshot) {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist state, keeping in-memory copy");
        }
    }

    pub(crate) fn sessions(&self) -> &DashMap<SessionId, Session> {
        &self.sessions
    }

    pub(crate) fn state(&self) -> &RwLock<PersistedState> {
        &self.state
    }
}
