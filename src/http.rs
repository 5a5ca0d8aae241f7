use crate::intake::{IntakeError, IntakeService};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    #[serde(rename = "Id")]
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct PointsResponse {
    pub points: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub receipts: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntakeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IntakeError::Decode(_) | IntakeError::Invalid(_) => StatusCode::BAD_REQUEST,
            IntakeError::NotFound(_) => StatusCode::NOT_FOUND,
            IntakeError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn build_router(intake: Arc<IntakeService>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/receipts/process", post(process_receipt))
        .route("/receipts/:id/points", get(receipt_points))
        .route("/healthz", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(intake)
}

async fn process_receipt(
    State(intake): State<Arc<IntakeService>>,
    body: Bytes,
) -> Result<Json<ProcessResponse>, IntakeError> {
    let submission = intake.submit(&body).await.inspect_err(|e| {
        log::debug!("Rejected submission: {e}");
    })?;
    // Publish keeps running detached
    Ok(Json(ProcessResponse { id: submission.id }))
}

async fn receipt_points(
    State(intake): State<Arc<IntakeService>>,
    Path(id): Path<String>,
) -> Result<Json<PointsResponse>, IntakeError> {
    let points = intake.get_points(&id).await?;
    Ok(Json(PointsResponse { points }))
}

async fn health(State(intake): State<Arc<IntakeService>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        receipts: intake.index().len().await,
    })
}
