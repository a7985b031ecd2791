//! `POST /v1/chat/completions` (§6), in both the non-streaming and
//! `text/event-stream` shapes.

use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use uuid::Uuid;
use warden_gateway::{ChatCompletionRequest, RawMessage};

use super::wire::{
    ChatCompletionChoice, ChatCompletionMessage, ChatCompletionResponse, ChatCompletionUsage, ChatCompletionsBody,
    parse_headers,
};
use crate::error::ServerError;
use crate::state::AppState;

/// `POST /v1/chat/completions`. Dispatches to the streaming or
/// non-streaming pipeline entry point based on the body's `stream` flag,
/// matching OpenAI's own single-endpoint convention.
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionsBody>,
) -> Result<Response, ServerError> {
    let http_request_id = Uuid::new_v4().to_string();
    let parsed = parse_headers(&headers, &http_request_id)?;

    let messages: Vec<RawMessage> = body
        .messages
        .iter()
        .map(|m| RawMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect();

    let request = ChatCompletionRequest {
        presented_key: parsed.presented_key,
        declared_environment: parsed.declared_environment,
        overridden_upstream_key: parsed.overridden_upstream_key,
        feature_id: parsed.feature_id,
        model: body.model,
        messages,
        max_tokens: body.max_tokens,
        temperature: body.temperature,
        dry_run: parsed.dry_run,
        org_id: None,
        user_id: body.user,
    };

    if body.stream {
        return Ok(chat_completions_stream(state, request, &http_request_id).await?.into_response());
    }

    let outcome = state
        .pipeline
        .execute(request)
        .await
        .map_err(|err| ServerError::from_gateway(err, &http_request_id))?;

    let response = outcome.response;
    let decision_chain = parsed.debug.then(|| outcome.warnings.clone());
    let body = ChatCompletionResponse {
        id: response.id,
        object: "chat.completion",
        created: chrono::Utc::now().timestamp(),
        model: response.model,
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionMessage {
                role: "assistant",
                content: response.content,
            },
            finish_reason: response.finish_reason,
        }],
        usage: ChatCompletionUsage {
            prompt_tokens: response.input_tokens,
            completion_tokens: response.output_tokens,
            total_tokens: response.input_tokens + response.output_tokens,
        },
        warnings: outcome.warnings,
        decision_chain,
    };

    Ok(Json(body).into_response())
}

async fn chat_completions_stream(
    state: AppState,
    request: ChatCompletionRequest,
    http_request_id: &str,
) -> Result<impl IntoResponse, ServerError> {
    let outcome = state
        .pipeline
        .execute_chat_stream(request)
        .await
        .map_err(|err| ServerError::from_gateway(err, http_request_id))?;

    let event_stream = outcome.chunks.map(|item| -> Result<Event, Infallible> {
        let event = match item {
            Ok(chunk) => {
                let payload = serde_json::json!({
                    "id": chunk.id,
                    "object": "chat.completion.chunk",
                    "model": chunk.model,
                    "choices": chunk.choices.iter().map(|c| serde_json::json!({
                        "index": c.index,
                        "delta": { "content": c.delta.content },
                        "finish_reason": c.finish_reason,
                    })).collect::<Vec<_>>(),
                });
                Event::default().json_data(payload).unwrap_or_else(|_| Event::default().data("{}"))
            }
            Err(err) => {
                let payload = serde_json::json!({ "error": { "code": "UPSTREAM_FAILED", "message": err.to_string() } });
                Event::default().json_data(payload).unwrap_or_else(|_| Event::default().data("{}"))
            }
        };
        Ok(event)
    });

    let done = futures::stream::once(async { Ok(Event::default().data("[DONE]")) });
    let full_stream = event_stream.chain(done);

    Ok(Sse::new(full_stream).keep_alive(KeepAlive::default()))
}
