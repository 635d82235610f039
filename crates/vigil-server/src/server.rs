use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::Router;
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use vigil_conn::ConnHandle;
use vigil_core::{EventLog, SessionId};
use vigil_store::{Session, Store, User};

use crate::bridge;
use crate::handlers;
use crate::ws::{self, ClientId, ClientRegistry};

/// Close code sent when a socket is admitted without a valid session.
const CLOSE_UNAUTHORIZED: u16 = 4401;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3900,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub conn: ConnHandle,
    pub log: Arc<EventLog>,
    pub registry: Arc<ClientRegistry>,
    pub control_tx: mpsc::Sender<(ClientId, String)>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/me", get(handlers::me))
        .route("/status", get(handlers::get_status))
        .route("/logs", get(handlers::get_logs))
        .route("/start", post(handlers::start_connection))
        .route("/stop", post(handlers::stop_connection))
        .route("/restart", post(handlers::restart_connection))
        .route("/config", get(handlers::get_config).post(handlers::update_config))
        .route("/users", get(handlers::list_users).post(handlers::create_user))
        .route(
            "/users/{id}",
            patch(handlers::update_user).delete(handlers::delete_user),
        )
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the
/// background tasks alive.
pub async fn start(
    config: ServerConfig,
    store: Arc<Store>,
    conn: ConnHandle,
    log: Arc<EventLog>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    let bridge_handle = bridge::start_event_bridge(Arc::clone(&log), Arc::clone(&registry));

    let cleanup_handle = ws::start_cleanup_task(
        Arc::clone(&registry),
        std::time::Duration::from_secs(60),
    );

    let (control_tx, control_rx) = mpsc::channel::<(ClientId, String)>(1024);

    let control_handle = tokio::spawn(ws::process_control_messages(
        control_rx,
        Arc::clone(&registry),
        Arc::clone(&store),
        conn.clone(),
    ));

    let app_state = AppState {
        store,
        conn,
        log,
        registry,
        control_tx,
    };

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Control server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _bridge: bridge_handle,
        _control: control_handle,
        _cleanup: cleanup_handle,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _bridge: tokio::task::JoinHandle<()>,
    _control: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    session: Option<String>,
}

/// WebSocket upgrade handler. Admission requires a valid session handle in
/// the query string; a bad handle still upgrades so the client gets a
/// structured close instead of a bare HTTP error.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let resolved = query
        .session
        .and_then(|s| state.store.resolve(&SessionId::from_raw(s)));

    match resolved {
        Some((user, session)) => {
            ws.on_upgrade(move |socket| accept_observer(socket, state, user, session))
        }
        None => ws.on_upgrade(reject_observer),
    }
}

async fn reject_observer(mut socket: WebSocket) {
    let frame = ws::error_message("UNAUTHORIZED", "missing or invalid session");
    let _ = socket.send(WsMessage::Text(frame.into())).await;
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame {
            code: CLOSE_UNAUTHORIZED,
            reason: "unauthorized".into(),
        })))
        .await;
}

async fn accept_observer(socket: WebSocket, state: AppState, user: User, session: Session) {
    let (client_id, rx) = state.registry.register(&user.name, session.id);
    tracing::info!(client_id = %client_id, user = %user.name, "Observer connected");

    let init = serde_json::json!({
        "type": "init",
        "status": state.conn.status(),
        "logs": state.log.recent(100),
        "user": { "id": user.id, "name": user.name, "role": user.role },
        "permissions": user.role.permissions(),
    });
    state.registry.send_to(&client_id, init.to_string());

    ws::handle_ws_connection(
        socket,
        client_id,
        rx,
        Arc::clone(&state.registry),
        state.control_tx.clone(),
    )
    .await;
}

/// Liveness check. Unauthenticated, so it carries no state beyond "up".
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "healthy" }))
}
