use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use vigil_core::{SessionId, UserId};

use crate::users::User;
use crate::Store;

/// Sliding session lifetime: every successful resolve pushes expiry out by
/// this much, so sessions idle out rather than expire on a fixed clock.
pub const SESSION_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Ephemeral bearer credential derived from a successful login.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

impl Store {
    pub(crate) fn create_session(&self, user_id: &UserId) -> Session {
        let session = Session {
            id: SessionId::new(),
            user_id: user_id.clone(),
            expires_at: Utc::now() + SESSION_TTL,
        };
        self.sessions().insert(session.id.clone(), session.clone());
        session
    }

    /// Resolve a session handle to its user, sliding expiry forward.
    ///
    /// Expired sessions and sessions whose owning user no longer exists are
    /// purged and treated as absent.
    pub fn resolve(&self, id: &SessionId) -> Option<(User, Session)> {
        let now = Utc::now();

        let user_id = {
            let entry = self.sessions().get(id)?;
            if entry.expires_at <= now {
                drop(entry);
                self.sessions().remove(id);
                return None;
            }
            entry.user_id.clone()
        };

        let Some(user) = self.get_user(&user_id) else {
            self.sessions().remove(id);
            return None;
        };

        let mut entry = self.sessions().get_mut(id)?;
        entry.expires_at = now + SESSION_TTL;
        let session = entry.clone();
        drop(entry);

        Some((user, session))
    }

    /// Unconditional removal; unknown handles are a no-op.
    pub fn logout(&self, id: &SessionId) {
        self.sessions().remove(id);
    }

    /// Drop every session belonging to `user_id`. Returns how many.
    pub fn revoke_sessions_for(&self, user_id: &UserId) -> usize {
        let doomed: Vec<SessionId> = self
            .sessions()
            .iter()
            .filter(|e| &e.user_id == user_id)
            .map(|e| e.id.clone())
            .collect();
        for id in &doomed {
            self.sessions().remove(id);
        }
        doomed.len()
    }

    /// Remove all sessions past expiry. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let doomed: Vec<SessionId> = self
            .sessions()
            .iter()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.id.clone())
            .collect();
        for id in &doomed {
            self.sessions().remove(id);
        }
        doomed.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }
}

/// Background task sweeping expired sessions independently of traffic, so
/// abandoned sessions do not accumulate.
pub fn start_sweep_task(store: Arc<Store>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = store.sweep_expired();
            if removed > 0 {
                tracing::info!(removed = removed, "Expired session sweep");
            }
        }
    })
}
