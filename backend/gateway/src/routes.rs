//! Operation handlers. Each decodes `{llm_name, ...input}`, derives the
//! deadline and hands the input to the pipeline.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use lessonkit_core::contracts::{v1, v2};
use lessonkit_pipeline::{run_with_deadline, LONG_DEADLINE, SHORT_DEADLINE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::deadline::{request_deadline, DeadlineQuery};
use crate::error::ApiError;
use crate::server::GatewayState;

pub const IMAGE_HASH_HEADER: &str = "x-image-hash";

/// Operation input plus the engine that should run it.
#[derive(Debug, Deserialize)]
pub struct EngineRequest<T> {
    pub llm_name: String,
    #[serde(flatten)]
    pub input: T,
}

impl<T> EngineRequest<T> {
    pub fn engine(&self) -> Result<&str, ApiError> {
        let name = self.llm_name.trim();
        if name.is_empty() {
            return Err(ApiError::bad_request("llm_name is empty"));
        }
        Ok(name)
    }
}

#[derive(Debug, Deserialize)]
pub struct PromptUpdate {
    pub provider: String,
    pub name: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct PromptUpdated {
    pub ok: bool,
    pub provider: String,
    pub name: String,
    pub path: String,
    pub size: usize,
    pub updated_at: DateTime<Utc>,
}

pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))
}

fn with_image_hash(image_hash: String, body: impl IntoResponse) -> Response {
    ([(IMAGE_HASH_HEADER, image_hash)], body).into_response()
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn detect(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<DeadlineQuery>,
    body: Bytes,
) -> Result<Json<v1::DetectResult>, ApiError> {
    let request: EngineRequest<v1::DetectInput> = decode(&body)?;
    let deadline = request_deadline(&headers, &query, SHORT_DEADLINE);
    let result = run_with_deadline(deadline, state.pipeline.detect(request.engine()?, &request.input)).await?;
    Ok(Json(result))
}

pub async fn parse(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<DeadlineQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: EngineRequest<v1::ParseInput> = decode(&body)?;
    let deadline = request_deadline(&headers, &query, LONG_DEADLINE);
    let outcome = run_with_deadline(deadline, state.pipeline.parse(request.engine()?, &request.input)).await?;
    Ok(with_image_hash(outcome.image_hash, Json(outcome.result)))
}

pub async fn confirm_parse(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<DeadlineQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: EngineRequest<v1::ConfirmParseInput> = decode(&body)?;
    let deadline = request_deadline(&headers, &query, SHORT_DEADLINE);
    let outcome =
        run_with_deadline(deadline, state.pipeline.confirm_parse(request.engine()?, &request.input)).await?;
    Ok(with_image_hash(outcome.image_hash, Json(outcome.result)))
}

pub async fn hint(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<DeadlineQuery>,
    body: Bytes,
) -> Result<Json<v1::HintResult>, ApiError> {
    let request: EngineRequest<v1::HintInput> = decode(&body)?;
    let deadline = request_deadline(&headers, &query, SHORT_DEADLINE);
    let result = run_with_deadline(deadline, state.pipeline.hint(request.engine()?, &request.input)).await?;
    Ok(Json(result))
}

pub async fn normalize(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<DeadlineQuery>,
    body: Bytes,
) -> Result<Json<v1::NormalizeResult>, ApiError> {
    let request: EngineRequest<v1::NormalizeInput> = decode(&body)?;
    let deadline = request_deadline(&headers, &query, SHORT_DEADLINE);
    let result =
        run_with_deadline(deadline, state.pipeline.normalize(request.engine()?, &request.input)).await?;
    Ok(Json(result))
}

pub async fn check(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<DeadlineQuery>,
    body: Bytes,
) -> Result<Json<v1::CheckResult>, ApiError> {
    let request: EngineRequest<v1::CheckInput> = decode(&body)?;
    let deadline = request_deadline(&headers, &query, LONG_DEADLINE);
    let result = run_with_deadline(deadline, state.pipeline.check(request.engine()?, &request.input)).await?;
    Ok(Json(result))
}

pub async fn analogue(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<DeadlineQuery>,
    body: Bytes,
) -> Result<Json<v1::AnalogueResult>, ApiError> {
    let request: EngineRequest<v1::AnalogueInput> = decode(&body)?;
    let deadline = request_deadline(&headers, &query, SHORT_DEADLINE);
    let result =
        run_with_deadline(deadline, state.pipeline.analogue(request.engine()?, &request.input)).await?;
    Ok(Json(result))
}

pub async fn update_prompt(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<PromptUpdated>, ApiError> {
    let request: PromptUpdate = decode(&body)?;
    let stored = state
        .pipeline
        .prompts()
        .store(&request.provider, &request.name, &request.text)
        .await?;
    Ok(Json(PromptUpdated {
        ok: true,
        provider: stored.provider,
        name: stored.name,
        path: stored.path.display().to_string(),
        size: stored.size,
        updated_at: stored.updated_at,
    }))
}

pub async fn parse_v2(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<DeadlineQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: EngineRequest<v2::ParseInput> = decode(&body)?;
    let deadline = request_deadline(&headers, &query, LONG_DEADLINE);
    let outcome = run_with_deadline(deadline, state.pipeline.parse_v2(request.engine()?, &request.input)).await?;
    Ok(with_image_hash(outcome.image_hash, Json(outcome.result)))
}

pub async fn hint_v2(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<DeadlineQuery>,
    body: Bytes,
) -> Result<Json<v2::HintResult>, ApiError> {
    let request: EngineRequest<v2::HintInput> = decode(&body)?;
    let deadline = request_deadline(&headers, &query, LONG_DEADLINE);
    let result = run_with_deadline(deadline, state.pipeline.hint_v2(request.engine()?, &request.input)).await?;
    Ok(Json(result))
}

pub async fn ocr(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<DeadlineQuery>,
    body: Bytes,
) -> Result<Json<v2::OcrResult>, ApiError> {
    let request: EngineRequest<v2::OcrInput> = decode(&body)?;
    let deadline = request_deadline(&headers, &query, LONG_DEADLINE);
    let result = run_with_deadline(deadline, state.pipeline.ocr(request.engine()?, &request.input)).await?;
    Ok(Json(result))
}
