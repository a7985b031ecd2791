//! `POST /v1/embeddings` (§6).

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use uuid::Uuid;
use warden_gateway::EmbeddingCallRequest;

use super::wire::{EmbeddingDatumResponse, EmbeddingsBody, EmbeddingsResponse, EmbeddingsUsageResponse, parse_headers};
use crate::error::ServerError;
use crate::state::AppState;

pub async fn embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EmbeddingsBody>,
) -> Result<impl IntoResponse, ServerError> {
    let http_request_id = Uuid::new_v4().to_string();
    let parsed = parse_headers(&headers, &http_request_id)?;

    let request = EmbeddingCallRequest {
        presented_key: parsed.presented_key,
        declared_environment: parsed.declared_environment,
        overridden_upstream_key: parsed.overridden_upstream_key,
        feature_id: parsed.feature_id,
        model: body.model,
        input: body.input.into_vec(),
        dry_run: parsed.dry_run,
        org_id: None,
        user_id: body.user,
    };

    let outcome = state
        .pipeline
        .execute_embeddings(request)
        .await
        .map_err(|err| ServerError::from_gateway(err, &http_request_id))?;

    let response = outcome.response;
    let body = EmbeddingsResponse {
        object: "list",
        data: response
            .data
            .into_iter()
            .map(|d| EmbeddingDatumResponse {
                object: "embedding",
                embedding: d.embedding,
                index: d.index,
            })
            .collect(),
        model: response.model,
        usage: EmbeddingsUsageResponse {
            prompt_tokens: response.usage.prompt_tokens,
            total_tokens: response.usage.total_tokens,
        },
        warnings: outcome.warnings,
    };

    Ok(Json(body))
}
