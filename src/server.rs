//! HTTP layer: routes, handlers, and the error-to-status mapping
//!
//! JSON over HTTP. Every handler delegates to the engine and converts
//! typed errors into status codes through one mapping; the resume upload is
//! the sole endpoint that reports failure inside a 200 body, because parsing
//! failures must never block an upload.

use crate::analytics::{compute_analytics, fetch_history, DEFAULT_HISTORY_LIMIT};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::errors::ShortlistError;
use crate::ml::parser::ResumeParser;
use crate::predict::{Prediction, PredictionEngine};
use crate::resume::{process_resume_upload, ResumeUploadOutcome};
use crate::whatif::{simulate, Scenario, WhatIfResult};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
pub struct AppState {
    pub config: EngineConfig,
    pub db: Database,
    pub engine: Arc<PredictionEngine>,
    pub parser: Arc<ResumeParser>,
    pub started_at: Instant,
}

impl AppState {
    fn upload_dir(&self) -> PathBuf {
        self.config.resolved_upload_dir()
    }
}

/// Typed error wrapper so handlers can use `?`
pub struct ApiError(ShortlistError);

impl From<ShortlistError> for ApiError {
    fn from(err: ShortlistError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            crate::logging::log_engine_error("Http", &self.0);
        }
        let body = json!({
            "error": self.0.user_message(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub job_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub scenario: Scenario,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictResponse {
    pub prediction: Prediction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub job_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Prediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub predictions: Vec<BatchItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfResponse {
    pub result: WhatIfResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationsQuery {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationsResponse {
    pub top_skills_to_learn: Vec<String>,
    pub skills_to_improve: Vec<String>,
    pub estimated_impact: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub predictions: Vec<Prediction>,
}

/// Build the router
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/shortlist/predict", post(predict_handler))
        .route("/api/shortlist/batch", post(batch_handler))
        .route("/api/shortlist/what-if", post(what_if_handler))
        .route(
            "/api/shortlist/recommendations/:job_id",
            get(recommendations_handler),
        )
        .route("/api/shortlist/history/:user_id", get(history_handler))
        .route("/api/shortlist/analytics/:user_id", get(analytics_handler))
        .route("/api/resume/upload", post(resume_upload_handler))
        .route("/api/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn require_id(value: &str, name: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError(ShortlistError::Validation(format!(
            "{} is required",
            name
        ))));
    }
    Ok(())
}

async fn predict_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    require_id(&request.user_id, "userId")?;
    require_id(&request.job_id, "jobId")?;

    let prediction = state.engine.predict(&request.user_id, &request.job_id).await?;
    Ok(Json(PredictResponse { prediction }))
}

async fn batch_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    require_id(&request.user_id, "userId")?;
    if request.job_ids.is_empty() {
        return Err(ApiError(ShortlistError::Validation(
            "jobIds must not be empty".to_string(),
        )));
    }

    let mut items = Vec::with_capacity(request.job_ids.len());
    for job_id in &request.job_ids {
        // One failed job never aborts the rest of the batch
        match state.engine.predict(&request.user_id, job_id).await {
            Ok(prediction) => items.push(BatchItem {
                job_id: job_id.clone(),
                status: "ok".to_string(),
                prediction: Some(prediction),
                error: None,
            }),
            Err(e) => items.push(BatchItem {
                job_id: job_id.clone(),
                status: "failed".to_string(),
                prediction: None,
                error: Some(e.user_message()),
            }),
        }
    }

    Ok(Json(BatchResponse { predictions: items }))
}

async fn what_if_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WhatIfRequest>,
) -> Result<Json<WhatIfResponse>, ApiError> {
    require_id(&request.user_id, "userId")?;
    require_id(&request.job_id, "jobId")?;
    if request.scenario.is_empty() {
        return Err(ApiError(ShortlistError::Validation(
            "scenario must change at least one skill".to_string(),
        )));
    }

    let result = simulate(
        &state.engine,
        &request.user_id,
        &request.job_id,
        &request.scenario,
    )
    .await?;
    Ok(Json(WhatIfResponse { result }))
}

/// How many of the baseline's missing skills feed the impact estimate
const RECOMMENDATION_SCENARIO_SKILLS: usize = 3;
const RECOMMENDATION_LIST_LIMIT: usize = 5;

async fn recommendations_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<RecommendationsQuery>,
) -> Result<Json<RecommendationsResponse>, ApiError> {
    require_id(&query.user_id, "userId")?;
    require_id(&job_id, "jobId")?;

    let baseline = state.engine.predict(&query.user_id, &job_id).await?;

    let estimated_impact = if baseline.missing_skills.is_empty() {
        0.0
    } else {
        let scenario = Scenario {
            added_skills: baseline
                .missing_skills
                .iter()
                .take(RECOMMENDATION_SCENARIO_SKILLS)
                .cloned()
                .collect(),
            ..Default::default()
        };
        let result = simulate(&state.engine, &query.user_id, &job_id, &scenario).await?;
        result.deltas.shortlist_probability
    };

    Ok(Json(RecommendationsResponse {
        top_skills_to_learn: baseline
            .missing_skills
            .iter()
            .take(RECOMMENDATION_LIST_LIMIT)
            .cloned()
            .collect(),
        skills_to_improve: baseline.weak_skills.clone(),
        estimated_impact,
    }))
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    require_id(&user_id, "userId")?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 100);

    let conn = state.db.open().map_err(ShortlistError::from)?;
    let predictions = fetch_history(&conn, &user_id, limit)?;
    Ok(Json(HistoryResponse { predictions }))
}

async fn analytics_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<crate::analytics::UserAnalytics>, ApiError> {
    require_id(&user_id, "userId")?;

    let conn = state.db.open().map_err(ShortlistError::from)?;
    let analytics = compute_analytics(&conn, &user_id)?;
    Ok(Json(analytics))
}

async fn resume_upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ResumeUploadOutcome>, ApiError> {
    let mut user_id = String::new();
    let mut file_name = "resume.pdf".to_string();
    let mut file_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError(ShortlistError::Validation(format!(
            "invalid multipart body: {}",
            e
        )))
    })? {
        match field.name().unwrap_or("") {
            "userId" => {
                user_id = field.text().await.map_err(|e| {
                    ApiError(ShortlistError::Validation(format!(
                        "invalid userId field: {}",
                        e
                    )))
                })?;
            }
            "resume" => {
                if let Some(name) = field.file_name() {
                    file_name = sanitize_file_name(name);
                }
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| {
                            ApiError(ShortlistError::Validation(format!(
                                "failed to read resume field: {}",
                                e
                            )))
                        })?
                        .to_vec(),
                );
            }
            other => {
                log::warn!("[Http] Ignoring unknown multipart field: {}", other);
            }
        }
    }

    require_id(&user_id, "userId")?;
    let file_bytes = file_bytes.ok_or_else(|| {
        ApiError(ShortlistError::Validation(
            "resume file field is required".to_string(),
        ))
    })?;

    let upload_dir = state.upload_dir();
    tokio::fs::create_dir_all(&upload_dir).await.map_err(|e| {
        ApiError(ShortlistError::Storage(
            crate::errors::StorageError::QueryFailed(format!(
                "cannot create upload directory: {}",
                e
            )),
        ))
    })?;

    let stored_path = upload_dir.join(format!(
        "{}_{}_{}",
        user_id,
        chrono::Utc::now().timestamp_millis(),
        file_name
    ));
    tokio::fs::write(&stored_path, &file_bytes).await.map_err(|e| {
        ApiError(ShortlistError::Storage(
            crate::errors::StorageError::QueryFailed(format!("cannot store upload: {}", e)),
        ))
    })?;

    let outcome =
        process_resume_upload(&state.db, &state.parser, &user_id, &stored_path).await?;
    Ok(Json(outcome))
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "resume.pdf".to_string()
    } else {
        cleaned
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let model_available = state.engine.model_available();
    Json(json!({
        "status": if model_available { "ok" } else { "degraded" },
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "modelAvailable": model_available,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingService;
    use crate::ml::mock::{MockEmbedder, MockStrengthModel};
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db"));
        db.init().unwrap();
        let config = EngineConfig::default();
        let embeddings = Arc::new(EmbeddingService::new(Box::new(MockEmbedder), false));
        let engine = Arc::new(PredictionEngine::new(
            db.clone(),
            embeddings,
            Arc::new(MockStrengthModel),
            &config,
        ));
        // The tempdir must outlive the state; leak it for the test process
        std::mem::forget(dir);
        Arc::new(AppState {
            config,
            db,
            engine,
            parser: Arc::new(ResumeParser::new(1_000)),
            started_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_app(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_predict_missing_ids_is_400() {
        let app = create_app(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/shortlist/predict")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(r#"{"userId":"","jobId":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict_unknown_user_is_404() {
        let app = create_app(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/shortlist/predict")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        r#"{"userId":"ghost","jobId":"j1"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_unknown_user_is_404() {
        let app = create_app(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/shortlist/history/ghost")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("my resume.pdf"), "my_resume.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name(""), "resume.pdf");
    }
}
