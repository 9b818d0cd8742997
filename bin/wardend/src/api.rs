//! ---
//! warden_section: "05-daemon"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "HTTP status and manual failover surface for the daemon."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};
use warden_redundancy::{
    ControllerError, FailoverEvent, RedundancyController, SystemStatus, TriggerType,
};
use warden_runtime::ServiceStatus;

/// Shared state handed to every handler.
pub struct ApiState {
    controller: Arc<RedundancyController>,
    version: &'static str,
    started: Instant,
}

impl ApiState {
    pub fn new(controller: Arc<RedundancyController>, version: &'static str) -> Self {
        Self {
            controller,
            version,
            started: Instant::now(),
        }
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/healthz", get(get_healthz))
        .route("/status", get(get_status))
        .route("/history/:service", get(get_history))
        .route("/failover", post(post_failover))
        .with_state(state)
}

/// Bind `addr` and serve the API until [`ApiServer::shutdown`].
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let app = router(state);
    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %local_addr, "api server starting");
        if let Err(err) = axum::serve(tcp_listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %local_addr, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    monitoring_active: bool,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct FailoverRequest {
    service: String,
    #[serde(default = "default_manual_trigger")]
    trigger: TriggerType,
}

fn default_manual_trigger() -> TriggerType {
    TriggerType::HealthCheckFailed
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        let status = match err {
            ControllerError::UnknownService(_) => StatusCode::NOT_FOUND,
            ControllerError::InvalidConfig(_) | ControllerError::NoRuntime => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

/// 200 while the monitoring loop runs, 503 otherwise.
async fn get_healthz(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<HealthResponse>) {
    let monitoring_active = state.controller.is_running();
    let code = if monitoring_active {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(HealthResponse {
            status: if monitoring_active { "ok" } else { "stopped" },
            monitoring_active,
            version: state.version,
            uptime_seconds: state.started.elapsed().as_secs(),
        }),
    )
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<SystemStatus> {
    Json(state.controller.status())
}

async fn get_history(
    State(state): State<Arc<ApiState>>,
    Path(service): Path<String>,
) -> Result<Json<Vec<ServiceStatus>>, ApiError> {
    if !state.controller.status().services.contains_key(&service) {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("service {service} is not monitored"),
        ));
    }
    Ok(Json(state.controller.history(&service)))
}

async fn post_failover(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<FailoverRequest>,
) -> Result<(StatusCode, Json<FailoverEvent>), ApiError> {
    info!(service = %request.service, trigger = %request.trigger, "manual failover via api");
    let event = state
        .controller
        .trigger_failover(&request.service, request.trigger)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(event)))
}
