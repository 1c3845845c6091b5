use crate::db::{DbError, InterviewDb};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use interview_core::store::{CreatedInterview, InterviewRecord, InterviewSummary, NewInterview};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

type Db = Arc<InterviewDb>;

/// Builds the `/api/interviews` router over `db`.
pub fn router(db: Db) -> Router {
    // Configure a permissive CORS policy so a browser front end on another origin can call the API.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/interviews", get(list_interviews).post(create_interview))
        .route("/api/interviews/{id}", get(get_interview))
        .layer(cors)
        .with_state(db)
}

pub enum ApiError {
    NotFound,
    Internal(String),
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Interview not found".to_string()),
            ApiError::Internal(message) => {
                tracing::error!("Request failed: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// SQLite calls block, so every handler hops onto the blocking pool.
async fn blocking<T, F>(db: Db, work: F) -> Result<T, ApiError>
where
    F: FnOnce(&InterviewDb) -> Result<T, DbError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || work(&db)).await?;
    Ok(result?)
}

async fn list_interviews(State(db): State<Db>) -> Result<Json<Vec<InterviewSummary>>, ApiError> {
    let summaries = blocking(db, |db| db.list()).await?;
    tracing::debug!("Listing {} interviews", summaries.len());
    Ok(Json(summaries))
}

async fn get_interview(
    State(db): State<Db>,
    Path(id): Path<i64>,
) -> Result<Json<InterviewRecord>, ApiError> {
    blocking(db, move |db| db.get(id))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn create_interview(
    State(db): State<Db>,
    Json(interview): Json<NewInterview>,
) -> Result<(StatusCode, Json<CreatedInterview>), ApiError> {
    let topic = interview.topic.clone();
    let id = blocking(db, move |db| db.insert(&interview)).await?;
    tracing::info!("Saved interview {} ({})", id, topic);
    Ok((StatusCode::CREATED, Json(CreatedInterview { id })))
}
