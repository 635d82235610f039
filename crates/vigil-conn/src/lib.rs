//! Connection lifecycle controller.
//!
//! Owns the single logical game connection: desired-state flag, observed
//! phase, reconnect scheduling, keep-alive pulses, and stale-connection
//! recycling. All mutations flow through one single-writer actor task so
//! transitions never interleave; everyone else reads published snapshots.
//!
//! The actual protocol client is a black box behind [`GameConnector`] /
//! [`GameConnection`]; the controller only consumes its event stream.

pub mod client;
pub mod mock;
pub mod supervisor;

pub use client::{ConnError, GameConnection, GameConnector, GameEvent};
pub use supervisor::{ConnHandle, ControlAck, Supervisor, Timing};
