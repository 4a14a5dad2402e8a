//! Prediction API
//!
//! HTTP surface over the correction engine and the training tables:
//! `/healthz`, `/status`, and the two internal prediction endpoints. The
//! prediction routes are guarded by the `x-internal-secret` header when a
//! secret is configured; an empty secret disables the check.

use crate::config::TrainingConfig;
use crate::serving::{
    CorrectionEngine, CorrectionRequest, CorrectionResponse, PostUsefulnessRequest,
    PostUsefulnessResponse,
};
use crate::storage::Repository;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SECRET_HEADER: &str = "x-internal-secret";

/// Shared state for all handlers
pub struct AppState {
    pub engine: CorrectionEngine,
    pub repo: Arc<dyn Repository>,
    pub training: TrainingConfig,
    pub internal_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// One registry row as shown by `/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub version: String,
    pub kind: String,
    pub deployed: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub resolved_markets: usize,
    pub training_posts: usize,
    pub models_available: Vec<ModelSummary>,
    pub can_train_correction: bool,
    pub can_train_usefulness: bool,
    pub last_trained: Option<String>,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    match build_status(&state).await {
        Ok(status) => Json(status),
        Err(e) => {
            tracing::warn!("status query failed: {e}");
            Json(StatusResponse {
                resolved_markets: 0,
                training_posts: 0,
                models_available: Vec::new(),
                can_train_correction: false,
                can_train_usefulness: false,
                last_trained: None,
            })
        }
    }
}

/// Assemble the `/status` payload; also used by the `status` CLI command
pub async fn build_status(state: &AppState) -> crate::error::Result<StatusResponse> {
    let resolved_markets = state.repo.resolved_markets().await?.len();
    let training_posts = state.repo.labeled_post_count().await?;
    let records = state.repo.model_records(None).await?;

    let last_trained = records.first().map(|r| r.created_at.to_rfc3339());
    let models_available = records
        .into_iter()
        .map(|r| ModelSummary {
            name: r.name,
            version: r.version,
            kind: match r.kind {
                crate::types::ModelKind::Regression => "regression".to_string(),
                crate::types::ModelKind::Classification => "classification".to_string(),
            },
            deployed: r.deployed,
            created_at: r.created_at.to_rfc3339(),
        })
        .collect();

    Ok(StatusResponse {
        resolved_markets,
        training_posts,
        models_available,
        can_train_correction: resolved_markets >= state.training.min_resolved_markets,
        can_train_usefulness: training_posts >= state.training.min_labeled_posts,
        last_trained,
    })
}

fn authorized(secret: &str, headers: &HeaderMap) -> bool {
    if secret.is_empty() {
        return true;
    }
    headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|provided| provided == secret)
        .unwrap_or(false)
}

async fn predict_correction(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CorrectionRequest>,
) -> Result<Json<CorrectionResponse>, StatusCode> {
    if !authorized(&state.internal_secret, &headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(state.engine.correct(&request, None).await))
}

async fn predict_post_usefulness(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PostUsefulnessRequest>,
) -> Result<Json<PostUsefulnessResponse>, StatusCode> {
    if !authorized(&state.internal_secret, &headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(state.engine.usefulness(&request, None).await))
}

/// Build the service router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/v1/predict/correction", post(predict_correction))
        .route("/v1/predict/post_usefulness", post(predict_post_usefulness))
        .with_state(state)
}

/// Bind and serve until shutdown
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> crate::error::Result<()> {
    let app = create_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("prediction api listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
