//! HTTP adapter
//!
//! Routes:
//! - POST /validate - `{source}` -> ValidationResult
//! - POST /compile  - `{source}` -> CompileResult
//! - POST /run      - `{source, options?}` -> RunResult, 422 when invalid

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::engine::{Engine, RunError};
use crate::types::{CompileResult, RunOptions, RunResult, ValidationResult};

// ============================================================================
// Request / Error Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SourceRequest {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub options: Option<RunOptions>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Run(RunError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
            }
            ApiError::Run(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "error": err.to_string(),
                    "diagnostics": err.diagnostics(),
                })),
            )
                .into_response(),
        }
    }
}

/// Decode the body and pull out a non-empty `source`.
fn source_request(body: &Bytes) -> Result<(String, RunOptions), ApiError> {
    let request: SourceRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
    match request.source {
        Some(source) if !source.is_empty() => Ok((source, request.options.unwrap_or_default())),
        _ => Err(ApiError::BadRequest("Missing 'source'".to_string())),
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/validate", post(validate))
        .route("/compile", post(compile))
        .route("/run", post(run))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Bind to the configured address and serve until the process exits.
pub async fn serve(config: &Config, engine: Engine) -> Result<()> {
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!("LMTagScript API listening on http://{}", addr);

    axum::serve(listener, router(engine))
        .await
        .context("Server error")
}

// ============================================================================
// Handlers
// ============================================================================

async fn validate(
    State(engine): State<Engine>,
    body: Bytes,
) -> Result<Json<ValidationResult>, ApiError> {
    let (source, _) = source_request(&body)?;
    Ok(Json(engine.validate(&source)))
}

async fn compile(
    State(engine): State<Engine>,
    body: Bytes,
) -> Result<Json<CompileResult>, ApiError> {
    let (source, _) = source_request(&body)?;
    Ok(Json(engine.compile(&source)))
}

async fn run(State(engine): State<Engine>, body: Bytes) -> Result<Json<RunResult>, ApiError> {
    let (source, options) = source_request(&body)?;
    engine
        .run(&source, options)
        .await
        .map(Json)
        .map_err(ApiError::Run)
}
