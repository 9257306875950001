//! WebSocket transport for proxy front ends.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use sshproxy_core::{SavedSettings, SessionConfig, SettingsStore};
use sshproxy_session::Supervisor;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::protocol::{ClientMessage, ServerMessage};

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Supervisor commands are routed to.
    pub supervisor: Arc<Supervisor>,
    /// Where the last submitted config and running flag are recorded.
    pub settings: Option<Arc<dyn SettingsStore>>,
}

impl WsState {
    #[must_use]
    pub const fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            settings: None,
        }
    }

    /// Record submitted configs so a restart can resume the session.
    #[must_use]
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    async fn remember(&self, config: Option<SessionConfig>, proxy_running: bool) {
        let Some(store) = &self.settings else {
            return;
        };
        let result = async {
            let mut saved = store.load().await.unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable settings: {e}");
                SavedSettings::default()
            });
            if config.is_some() {
                saved.config = config;
            }
            saved.proxy_running = proxy_running;
            store.save(&saved).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!("Failed to save settings: {e}");
        }
    }
}

/// Apply one client message and return the direct reply, if any.
///
/// Progress of `Start` and `Stop` is reported through the event stream,
/// not through the reply.
pub async fn dispatch(state: &WsState, message: ClientMessage) -> Option<ServerMessage> {
    let result = match message {
        ClientMessage::Ping => return Some(ServerMessage::Pong),
        ClientMessage::Status => {
            return Some(ServerMessage::Status {
                snapshot: state.supervisor.snapshot(),
            });
        }
        ClientMessage::Start { config } => {
            state.remember(Some(config.clone()), true).await;
            state.supervisor.start(config)
        }
        ClientMessage::Stop => {
            state.remember(None, false).await;
            state.supervisor.stop()
        }
    };

    result.err().map(|e| ServerMessage::Error {
        message: e.to_string(),
    })
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match msg.to_json() {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let _ = tx.send(ServerMessage::Status {
        snapshot: state.supervisor.snapshot(),
    });

    // History first, then live events
    let mut events = state.supervisor.subscribe();
    let events_tx = tx.clone();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if events_tx.send(event.into()).is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg = match ClientMessage::parse(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::Error {
                    message: e.to_string(),
                });
                continue;
            }
        };

        if let Some(reply) = dispatch(&state, client_msg).await {
            let _ = tx.send(reply);
        }
    }

    event_task.abort();
    send_task.abort();
    tracing::debug!("WebSocket client disconnected");
}

/// SSE handler streaming supervisor events (requires `sse` feature).
#[cfg(feature = "sse")]
pub async fn sse_handler(
    State(state): State<WsState>,
) -> axum::response::Sse<
    axum::response::sse::KeepAliveStream<
        futures::stream::BoxStream<
            'static,
            Result<axum::response::sse::Event, std::convert::Infallible>,
        >,
    >,
> {
    axum::response::Sse::new(state.supervisor.events().sse_stream())
        .keep_alive(axum::response::sse::KeepAlive::default())
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(WsState::new(supervisor)));
/// ```
#[must_use]
pub fn create_ws_router(state: WsState) -> Router {
    let router = Router::new().route("/ws", get(ws_handler));

    #[cfg(feature = "sse")]
    let router = router.route("/events", get(sse_handler));

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use sshproxy_core::{EngineError, EngineRequest, Phase, TunnelEngine};
    use sshproxy_session::{
        SupervisorConfig,
        storage::{FileStager, MemoryStore},
    };

    use super::*;

    struct NoopEngine;

    #[async_trait]
    impl TunnelEngine for NoopEngine {
        async fn start(&self, _request: &EngineRequest) -> Result<(), EngineError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn state(dir: &tempfile::TempDir, store: Arc<MemoryStore>) -> WsState {
        let config = SupervisorConfig::default()
            .with_health_interval(Duration::from_secs(60))
            .with_log_endpoint(None);
        let supervisor = Supervisor::builder(Arc::new(NoopEngine))
            .stager(Arc::new(FileStager::new(dir.path())))
            .config(config)
            .spawn();
        WsState::new(Arc::new(supervisor)).with_settings(store)
    }

    #[tokio::test]
    async fn test_ping_and_status_reply_directly() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, Arc::new(MemoryStore::new()));

        assert!(matches!(
            dispatch(&state, ClientMessage::Ping).await,
            Some(ServerMessage::Pong)
        ));
        let Some(ServerMessage::Status { snapshot }) =
            dispatch(&state, ClientMessage::Status).await
        else {
            panic!("expected a status reply");
        };
        assert_eq!(snapshot.phase, Phase::Stopped);
    }

    #[tokio::test]
    async fn test_start_and_stop_record_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let state = state(&dir, Arc::clone(&store));
        let config = SessionConfig::new("h", "u", "k");

        let reply = dispatch(
            &state,
            ClientMessage::Start {
                config: config.clone(),
            },
        )
        .await;
        assert!(reply.is_none());

        let mut watch = state.supervisor.watch();
        watch
            .wait_for(|s| s.phase == Phase::Running)
            .await
            .unwrap();
        let saved = store.load().await.unwrap();
        assert_eq!(saved.config, Some(config.clone()));
        assert!(saved.proxy_running);

        assert!(dispatch(&state, ClientMessage::Stop).await.is_none());
        watch
            .wait_for(|s| s.phase == Phase::Stopped)
            .await
            .unwrap();
        let saved = store.load().await.unwrap();
        assert_eq!(saved.config, Some(config));
        assert!(!saved.proxy_running);
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_report_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, Arc::new(MemoryStore::new()));
        state.supervisor.shutdown().await;

        let reply = dispatch(&state, ClientMessage::Stop).await;
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));
    }
}
