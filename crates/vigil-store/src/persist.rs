use std::path::Path;

use serde::{Deserialize, Serialize};
use vigil_core::BotConfig;

use crate::error::StoreError;
use crate::users::User;

/// The single structured record written to disk: config plus the user list.
/// Sessions are deliberately absent; they are ephemeral.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub config: BotConfig,
    pub users: Vec<User>,
}

/// Load state from `path`. A missing file is a fresh install; a corrupt
/// file is logged and replaced with defaults rather than refusing to start.
pub fn load(path: &Path) -> PersistedState {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no state file, starting with defaults");
            return PersistedState::default();
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to read state file, using defaults");
            return PersistedState::default();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to parse state file, using defaults");
            PersistedState::default()
        }
    }
}

/// Atomically write state: serialize to a sibling tmp file, then rename.
pub fn save(path: &Path, state: &PersistedState) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
