// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Order endpoints take their parameters from the query string, validate
// synchronously and answer `202 Accepted` with the first watcher's id; the
// protocol then runs in the background. Outcomes are not pushed back.
//
// Errors are `{ "error": "..." }` with a status derived from the failure:
// 400 validation, 404 unknown exit, 409 exit already resolved, 502 broker,
// 503 supervisor stopped.
//
// CORS is configured permissively; the desk is meant to sit behind a trusted
// network boundary.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::strategy::partial::{place_partial, PartialOrder};
use crate::strategy::simple::{place_ut, UtOrder};
use crate::strategy::trailing::{modify_exit, ModifyRequest};
use crate::strategy::StrategyError;
use crate::supervisor::SupervisorError;

// =============================================================================
// Router construction
// =============================================================================

/// Build the REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        // ── Orders ──────────────────────────────────────────────────
        .route("/order/place/ut", post(place_ut_order))
        .route("/order/modify", post(modify_exit_order))
        .route("/order/place/partial", post(place_partial_order))
        // ── Diagnostics ─────────────────────────────────────────────
        .route("/workers/getactive", get(active_workers))
        .route("/workers/cancel", post(cancel_worker))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

/// Every handler failure, rendered as a JSON error body.
#[derive(Debug)]
pub enum ApiError {
    BadQuery(QueryRejection),
    Strategy(StrategyError),
    Supervisor(SupervisorError),
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::BadQuery(e)
    }
}

impl From<StrategyError> for ApiError {
    fn from(e: StrategyError) -> Self {
        Self::Strategy(e)
    }
}

impl From<SupervisorError> for ApiError {
    fn from(e: SupervisorError) -> Self {
        Self::Supervisor(e)
    }
}

fn supervisor_status(e: &SupervisorError) -> StatusCode {
    match e {
        SupervisorError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        SupervisorError::InvalidSpec(_) => StatusCode::BAD_REQUEST,
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadQuery(_) => StatusCode::BAD_REQUEST,
            Self::Supervisor(e) => supervisor_status(e),
            Self::Strategy(e) => match e {
                StrategyError::Validation(_) | StrategyError::UnsupportedInstrument { .. } => {
                    StatusCode::BAD_REQUEST
                }
                StrategyError::NoSuchExit(_) => StatusCode::NOT_FOUND,
                StrategyError::AlreadyResolved(_) => StatusCode::CONFLICT,
                StrategyError::Broker(_) => StatusCode::BAD_GATEWAY,
                StrategyError::Supervisor(inner) => supervisor_status(inner),
            },
        }
    }

    fn message(&self) -> String {
        match self {
            Self::BadQuery(e) => e.body_text(),
            Self::Strategy(e) => e.to_string(),
            Self::Supervisor(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        warn!(status = status.as_u16(), error = %message, "request rejected");
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health().await)
}

// =============================================================================
// Orders
// =============================================================================

async fn place_ut_order(
    State(state): State<Arc<AppState>>,
    query: Result<Query<UtOrder>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(order) = query?;
    let placement = place_ut(state, order).await?;
    Ok(accepted(&placement.id))
}

async fn place_partial_order(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PartialOrder>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(order) = query?;
    let placement = place_partial(state, order).await?;
    Ok(accepted(&placement.id))
}

async fn modify_exit_order(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ModifyRequest>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(request) = query?;
    let replaced = request.id.clone();
    let placement = modify_exit(state, request).await?;
    Ok(Json(json!({
        "status": "modified",
        "id": placement.id,
        "replaced": replaced,
    })))
}

/// The protocol task keeps running after the handle is dropped.
fn accepted(id: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "id": id })),
    )
}

// =============================================================================
// Diagnostics
// =============================================================================

async fn active_workers(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.supervisor.list_all().await?))
}

#[derive(Debug, Deserialize)]
struct CancelQuery {
    id: String,
}

/// Unknown ids are accepted silently.
async fn cancel_worker(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CancelQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(CancelQuery { id }) = query?;
    state.supervisor.cancel(&id)?;
    info!(id = %id, "cancel requested over HTTP");
    Ok(Json(json!({ "status": "cancel requested", "id": id })))
}
