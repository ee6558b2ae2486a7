//! HTTP API for the panel: party cards, actions, transfers and commits

use crate::config::ApiConfig;
use crate::error::{PanelError, PanelResult};
use crate::events::HeadTag;
use crate::panel::Panel;
use crate::state::OperationKind;
use crate::tx::TransferRequest;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub panel: Arc<Panel>,
}

pub fn router(panel: Arc<Panel>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/parties", get(list_parties))
        .route("/parties/:party", get(get_party))
        .route("/parties/:party/utxo", get(get_utxo_set))
        .route("/parties/:party/errors/:kind", delete(dismiss_error))
        .route("/actions", get(get_actions))
        .route("/transactions", get(get_transactions))
        .route("/transfer", post(submit_transfer))
        .route("/commit", post(submit_commit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(AppState { panel })
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, panel: Arc<Panel>) -> PanelResult<()> {
    let app = router(panel);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PanelError::Config(format!("Failed to bind API {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| PanelError::Config(format!("API server failed: {}", e)))?;

    Ok(())
}

/// Panel errors as HTTP responses
pub struct ApiError(PanelError);

impl From<PanelError> for ApiError {
    fn from(e: PanelError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PanelError::UnknownParty { .. } => StatusCode::NOT_FOUND,
            e if e.is_fatal_input() => StatusCode::BAD_REQUEST,
            PanelError::Node { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.user_message(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        parties: state.panel.parties().len(),
    })
}

async fn list_parties(State(state): State<AppState>) -> impl IntoResponse {
    let parties = state
        .panel
        .parties()
        .into_iter()
        .filter_map(|party| state.panel.snapshot(&party).ok())
        .map(|snapshot| PartySummary {
            tag: snapshot.status.as_ref().map(|s| s.tag),
            utxo_count: snapshot.utxos.as_ref().map(|u| u.len()),
            error_count: snapshot.errors.len(),
            connected: snapshot.connected,
            party: snapshot.party,
        })
        .collect::<Vec<_>>();

    Json(parties)
}

async fn get_party(
    State(state): State<AppState>,
    Path(party): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.panel.snapshot(&party)?))
}

async fn get_utxo_set(
    State(state): State<AppState>,
    Path(party): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.panel.utxo_set(&party)?))
}

async fn dismiss_error(
    State(state): State<AppState>,
    Path((party, kind)): Path<(String, String)>,
) -> ApiResult<DismissResponse> {
    let kind: OperationKind = kind.parse()?;
    let dismissed = state.panel.dismiss_error(&party, kind)?;
    Ok(Json(DismissResponse { dismissed }))
}

async fn get_actions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.panel.action_availability())
}

async fn get_transactions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.panel.transactions().await)
}

async fn submit_transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> ApiResult<SubmitResponse> {
    let tx_id = state.panel.submit_transfer(request).await?;
    Ok(Json(SubmitResponse {
        tx_id: tx_id.to_string(),
    }))
}

async fn submit_commit(
    State(state): State<AppState>,
    Json(request): Json<CommitRequest>,
) -> ApiResult<SubmitResponse> {
    let tx_id = state
        .panel
        .submit_commit(&request.party, &request.utxo_ref)
        .await?;
    Ok(Json(SubmitResponse {
        tx_id: tx_id.to_string(),
    }))
}

// Request and response types

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitRequest {
    party: String,
    utxo_ref: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    parties: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PartySummary {
    party: String,
    connected: bool,
    tag: Option<HeadTag>,
    utxo_count: Option<usize>,
    error_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    tx_id: String,
}

#[derive(Serialize)]
struct DismissResponse {
    dismissed: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
