//! `SlideSyncServer`: Axum HTTP + WebSocket surface around the event hub.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::CredentialVerifier;
use crate::config::ServerConfig;
use crate::documents::{self, DocumentError, DocumentStore};
use crate::health::{self, HealthResponse};
use crate::metrics::{
    DOCUMENTS_REJECTED_TOTAL, DOCUMENTS_UPLOADED_TOTAL, WS_ADMISSION_REJECTIONS_TOTAL,
};
use crate::protocol::ServerMessage;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::dispatcher::Dispatcher;
use crate::websocket::hub::{EventHub, HubHandle};
use crate::websocket::session::{SessionContext, run_ws_session};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 16 * 1024;

/// Server startup and runtime failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The HTTP server stopped with an error.
    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub submission handle.
    pub hub: HubHandle,
    /// Handed to every WebSocket session.
    pub session: Arc<SessionContext>,
    /// Uploaded documents.
    pub documents: Arc<dyn DocumentStore>,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
    /// Max inbound WebSocket message size.
    pub max_message_size: usize,
    /// Largest accepted upload.
    pub max_upload_bytes: usize,
}

/// The slidesync server.
pub struct SlideSyncServer {
    config: ServerConfig,
    state: AppState,
    shutdown: ShutdownCoordinator,
    hub_task: Mutex<Option<JoinHandle<()>>>,
}

impl SlideSyncServer {
    /// Create a server and start its event hub.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: ServerConfig,
        verifier: Arc<dyn CredentialVerifier>,
        documents: Arc<dyn DocumentStore>,
        metrics: PrometheusHandle,
    ) -> Self {
        let shutdown = ShutdownCoordinator::new();
        let dispatcher = Dispatcher::new(config.max_dropped_messages);
        let (hub, hub_handle) = EventHub::new(
            config.max_connections,
            config.event_queue_capacity,
            dispatcher,
        );
        let hub_task = tokio::spawn(hub.run(shutdown.token()));

        let session = Arc::new(SessionContext {
            hub: hub_handle.clone(),
            dispatcher,
            verifier,
            outbox_capacity: config.outbox_capacity,
            send_timeout: config.send_timeout(),
            shutdown: shutdown.token(),
            tasks: shutdown.tracker().clone(),
        });
        let state = AppState {
            hub: hub_handle,
            session,
            documents,
            metrics,
            start_time: Instant::now(),
            max_message_size: config.max_message_size,
            max_upload_bytes: config.max_upload_bytes,
        };

        Self {
            config,
            state,
            shutdown,
            hub_task: Mutex::new(Some(hub_task)),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let upload_limit = self
            .config
            .max_upload_bytes
            .saturating_add(MULTIPART_OVERHEAD);
        Router::new()
            .route("/ws", get(ws_handler))
            .route(
                "/upload",
                post(upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
            )
            .route("/uploads/{filename}", get(document_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(cors_layer(&self.config.allowed_origins))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve in the background until
    /// shutdown. Returns the bound address and the server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!(
            %local_addr,
            max_connections = self.config.max_connections,
            "slidesync server listening"
        );

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = serve(listener, router, token).await {
                error!(error = %e, "server stopped");
            }
        });
        Ok((local_addr, handle))
    }

    /// Hub submission handle.
    pub fn hub(&self) -> &HubHandle {
        &self.state.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Take the hub task so it can be awaited during shutdown. Returns
    /// `None` after the first call.
    pub fn take_hub_task(&self) -> Option<JoinHandle<()>> {
        self.hub_task.lock().take()
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Serve `router` on `listener` until `token` is cancelled.
async fn serve(
    listener: TcpListener,
    router: Router,
    token: CancellationToken,
) -> Result<(), ServerError> {
    axum::serve(listener, router)
        .with_graceful_shutdown(token.cancelled_owned())
        .await
        .map_err(ServerError::Serve)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if !state.hub.has_capacity() {
        counter!(WS_ADMISSION_REJECTIONS_TOTAL).increment(1);
        warn!(
            max_connections = state.hub.max_connections(),
            "registry full, refusing upgrade"
        );
        return (StatusCode::TOO_MANY_REQUESTS, "Too many connections").into_response();
    }
    let conn_id = format!("conn_{}", Uuid::now_v7());
    let session = state.session.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| {
            let tasks = session.tasks.clone();
            tasks.track_future(run_ws_session(socket, conn_id, session))
        })
}

/// Body of a successful upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    filename: String,
    full_url: String,
    message: &'static str,
}

/// POST /upload
async fn upload_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, DocumentError> {
    let result = store_upload(&state, multipart).await;
    if let Err(e) = &result {
        counter!(DOCUMENTS_REJECTED_TOTAL, "reason" => e.label()).increment(1);
        warn!(error = %e, "upload rejected");
    }
    result
}

async fn store_upload(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, DocumentError> {
    let multipart = multipart.map_err(|_| DocumentError::MissingFile)?;
    let upload = documents::read_upload(multipart, state.max_upload_bytes).await?;
    let filename = documents::stored_name(&upload.file_name, chrono::Utc::now().timestamp())?;
    let bytes = upload.data.len();

    state
        .documents
        .put(&filename, upload.data)
        .await
        .map_err(|e| {
            error!(%filename, error = %e, "failed to store document");
            DocumentError::Storage(e)
        })?;
    counter!(DOCUMENTS_UPLOADED_TOTAL).increment(1);
    info!(%filename, bytes, "document stored");

    let announce = ServerMessage::NewPdf {
        filename: filename.clone(),
    };
    if let Err(e) = state.hub.publish(announce).await {
        warn!(%filename, error = %e, "could not announce document");
    }

    Ok(Json(UploadResponse {
        full_url: format!("/uploads/{filename}"),
        filename,
        message: "File uploaded successfully",
    }))
}

/// GET /uploads/{filename}
async fn document_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, DocumentError> {
    documents::validate_name(&filename)?;
    match state.documents.get(&filename).await {
        Ok(Some(data)) => Ok(([(header::CONTENT_TYPE, "application/pdf")], data).into_response()),
        Ok(None) => Err(DocumentError::NotFound),
        Err(e) => {
            error!(%filename, error = %e, "failed to read document");
            Err(DocumentError::Storage(e))
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.participant_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
