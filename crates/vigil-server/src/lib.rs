//! Control surface: authenticated HTTP routes plus the realtime WebSocket
//! channel. Every operation resolves the bearer session, checks the
//! required capability, and dispatches to the store or the connection
//! supervisor; status and log deltas fan out to all admitted observers.

pub mod auth;
pub mod bridge;
pub mod handlers;
pub mod server;
pub mod ws;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
