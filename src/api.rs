//! HTTP handlers for review analysis.

use crate::config::{Settings, CANDIDATE_MODELS};
use crate::responder::{ReplySource, Responder};
use crate::sentiment::{self, Sentiment};
use crate::text::clean_text;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::ToSchema;

const MAX_TEXT_CHARS: usize = 2000;
/// Cleaned texts shorter than this get low confidence.
const SHORT_TEXT_CHARS: usize = 10;

pub struct AppState {
    pub settings: Settings,
    pub responder: Responder,
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyseRequest {
    /// Review text, 1 to 2000 characters.
    #[serde(alias = "texte")]
    pub text: String,
    /// Optional star rating, 1 to 5. Overrides keyword analysis.
    #[serde(default, alias = "note_numerique")]
    pub rating: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    High,
    VeryHigh,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalyseResponse {
    pub sentiment: Sentiment,
    pub reply: String,
    pub reply_source: ReplySource,
    pub cleaned_text: String,
    pub confidence: Confidence,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// "ai" when the generation sidecar is enabled, otherwise "fallback".
    pub mode: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IndexResponse {
    pub message: String,
    pub description: String,
    pub version: String,
    pub docs: String,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub ai_mode: String,
    pub candidate_models: Vec<String>,
    pub version: String,
    pub environment: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DebugTextRequest {
    #[serde(alias = "texte")]
    pub text: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DebugTextResponse {
    pub original: String,
    pub cleaned: String,
    pub sentiment: Sentiment,
    pub score: f32,
    pub positive_count: usize,
    pub negative_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub detail: String,
}

pub struct ApiError(StatusCode, String);

impl ApiError {
    fn invalid(detail: impl Into<String>) -> Self {
        Self(StatusCode::UNPROCESSABLE_ENTITY, detail.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { detail: self.1 })).into_response()
    }
}

fn ai_mode(state: &AppState) -> &'static str {
    if state.responder.ai_enabled() {
        "ai"
    } else {
        "fallback"
    }
}

fn validate_text(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::invalid("text must not be empty"));
    }
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(ApiError::invalid(format!("text must be at most {} characters", MAX_TEXT_CHARS)));
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

#[utoipa::path(get, path = "/", tag = "reviews", responses((status = 200, body = IndexResponse)))]
pub async fn index(State(state): State<Arc<AppState>>) -> Json<IndexResponse> {
    Json(IndexResponse {
        message: state.settings.api.title.to_string(),
        description: state.settings.api.description.to_string(),
        version: state.settings.api.version.to_string(),
        docs: "/docs".to_string(),
        endpoints: ["GET /health", "POST /analyse", "GET /stats"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    })
}

#[utoipa::path(get, path = "/health", tag = "reviews", responses((status = 200, body = HealthResponse)))]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.settings.api.version.to_string(),
        mode: ai_mode(&state).to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/analyse",
    tag = "reviews",
    request_body = AnalyseRequest,
    responses(
        (status = 200, description = "Sentiment and suggested reply", body = AnalyseResponse),
        (status = 422, description = "Invalid review", body = ErrorBody)
    )
)]
pub async fn analyse(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyseRequest>,
) -> Result<Json<AnalyseResponse>, ApiError> {
    validate_text(&req.text)?;
    let rated = match req.rating {
        Some(rating) => Some(
            Sentiment::from_rating(rating).ok_or_else(|| ApiError::invalid("rating must be between 1 and 5"))?,
        ),
        None => None,
    };

    let cleaned_text = clean_text(&req.text);
    let sentiment = rated.unwrap_or_else(|| sentiment::analyze(&req.text).label);
    let confidence = if rated.is_some() {
        Confidence::VeryHigh
    } else if cleaned_text.chars().count() < SHORT_TEXT_CHARS {
        Confidence::Low
    } else {
        Confidence::High
    };

    let reply = state.responder.reply(&cleaned_text, sentiment).await;
    tracing::info!("📝 Review analysed: {} ({:?}, {:?} reply)", sentiment, confidence, reply.source);

    Ok(Json(AnalyseResponse {
        sentiment,
        reply: reply.text,
        reply_source: reply.source,
        cleaned_text,
        confidence,
    }))
}

#[utoipa::path(get, path = "/stats", tag = "reviews", responses((status = 200, body = StatsResponse)))]
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        ai_mode: ai_mode(&state).to_string(),
        candidate_models: CANDIDATE_MODELS.iter().map(|m| m.to_string()).collect(),
        version: state.settings.api.version.to_string(),
        environment: state.settings.deployment.env.clone(),
    })
}

/// Text pipeline internals. Only served in development.
#[utoipa::path(
    post,
    path = "/debug/text",
    tag = "debug",
    request_body = DebugTextRequest,
    responses(
        (status = 200, body = DebugTextResponse),
        (status = 404, description = "Not in development", body = ErrorBody)
    )
)]
pub async fn debug_text(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DebugTextRequest>,
) -> Result<Json<DebugTextResponse>, ApiError> {
    if !state.settings.deployment.debug {
        return Err(ApiError(StatusCode::NOT_FOUND, "not found".to_string()));
    }
    validate_text(&req.text)?;
    let result = sentiment::analyze(&req.text);
    Ok(Json(DebugTextResponse {
        cleaned: clean_text(&req.text),
        original: req.text,
        sentiment: result.label,
        score: result.score,
        positive_count: result.positive_count,
        negative_count: result.negative_count,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/analyse", post(analyse))
        .route("/stats", get(stats))
        .route("/debug/text", post(debug_text))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
