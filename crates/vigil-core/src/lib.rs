//! Shared vocabulary for the vigil workspace: IDs, roles and capability
//! tables, the error taxonomy, connection status types, bot config, and the
//! bounded event log that fans out to the realtime hub.

pub mod config;
pub mod errors;
pub mod ids;
pub mod log;
pub mod roles;
pub mod status;

pub use config::{BotConfig, ConfigPatch};
pub use errors::ApiError;
pub use ids::{SessionId, UserId};
pub use log::{ControlEvent, EventLog, LogEntry, LogLevel, DEFAULT_LOG_CAPACITY};
pub use roles::{Capability, Role};
pub use status::{ConnStatus, Phase, Reachability};
