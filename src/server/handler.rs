// Axum request handlers: HTTP routes for session control plus the SSE event stream.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info};

use crate::engine::events::SessionId;
use crate::engine::manager::{CreateRequest, SessionManager};
use crate::error::SessionError;

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = match &self {
            SessionError::MissingField(_) | SessionError::MalformedPath { .. } => {
                StatusCode::BAD_REQUEST
            }
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub struct ApiServer {
    addr: SocketAddr,
    manager: Arc<SessionManager>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ApiServer {
    /// Bind `bind` (use port 0 for a random port) and serve in the background.
    pub async fn start(manager: Arc<SessionManager>, bind: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| anyhow!("cannot bind {}: {}", bind, e))?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let app = router(Arc::clone(&manager));

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!("api server stopped with error: {}", e);
            }
        });
        info!("api server listening on {}", addr);

        Ok(Self {
            addr,
            manager,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Absolute URL of an API path on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Stop accepting connections. Open SSE streams end with the server.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub fn router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/api/sessions", get(list_handler).post(create_handler))
        .route(
            "/api/sessions/{session_id}",
            get(status_handler).delete(cancel_handler),
        )
        .route("/api/validate-path", get(validate_path_handler))
        .route("/api/events", get(events_handler))
        .with_state(manager)
}

/// POST /api/sessions: start a download session.
async fn create_handler(
    State(manager): State<Arc<SessionManager>>,
    Json(request): Json<CreateRequest>,
) -> Response {
    match manager.create(request) {
        Ok(session_id) => (
            StatusCode::CREATED,
            Json(json!({ "sessionId": session_id })),
        )
            .into_response(),
        Err(e) => {
            debug!("create rejected: {}", e);
            e.into_response()
        }
    }
}

/// GET /api/sessions: ids of live sessions.
async fn list_handler(State(manager): State<Arc<SessionManager>>) -> Response {
    Json(json!({ "sessions": manager.list() })).into_response()
}

/// GET /api/sessions/{session_id}
async fn status_handler(
    State(manager): State<Arc<SessionManager>>,
    Path(session_id): Path<String>,
) -> Response {
    let id = SessionId::from(session_id);
    match manager.status(&id) {
        Some(info) => Json(info).into_response(),
        None => SessionError::NotFound(id).into_response(),
    }
}

/// DELETE /api/sessions/{session_id}: cancel.
async fn cancel_handler(
    State(manager): State<Arc<SessionManager>>,
    Path(session_id): Path<String>,
) -> Response {
    let id = SessionId::from(session_id);
    match manager.try_cancel(&id) {
        Ok(()) => Json(json!({ "cancelled": true, "sessionId": id })).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ValidatePathParams {
    path: Option<String>,
}

/// GET /api/validate-path?path=...
async fn validate_path_handler(
    State(manager): State<Arc<SessionManager>>,
    Query(params): Query<ValidatePathParams>,
) -> Response {
    let raw = params.path.unwrap_or_default();
    Json(manager.validate_path(&raw)).into_response()
}

/// GET /api/events: every session event as one SSE `data:` frame.
async fn events_handler(
    State(manager): State<Arc<SessionManager>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = manager.subscribe();
    debug!("sse observer {} connected", subscription.id());
    let stream = ReceiverStream::new(subscription.into_receiver()).map(|event| {
        let frame = SseEvent::default()
            .json_data(event.as_ref())
            .unwrap_or_else(|e| SseEvent::default().comment(format!("unserializable event: {}", e)));
        Ok(frame)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
