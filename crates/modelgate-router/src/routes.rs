use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE};
use axum::response::Response;
use axum::routing::{get, post};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use modelgate_common::{GatewayError, TraceId};
use modelgate_core::{Engine, EngineOutput, InboundRequest, StreamHandle};
use modelgate_protocol::claude;
use modelgate_protocol::openai;

use crate::auth::{AuthError, authenticate};
use crate::tokens::estimate_input_tokens;

const TRACE_HEADER: &str = "x-modelgate-request-id";

/// The two inbound error-body shapes; picked by the route the request hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorShape {
    Claude,
    OpenAi,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub gateway_key: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(claude_messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/v1/aliases", get(list_aliases))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn claude_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_completion(state, headers, body, ErrorShape::Claude).await
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_completion(state, headers, body, ErrorShape::OpenAi).await
}

async fn handle_completion(
    state: AppState,
    headers: HeaderMap,
    body: Bytes,
    shape: ErrorShape,
) -> Response {
    let trace_id = TraceId::generate();
    let auth = match authenticate(&headers, state.gateway_key.as_deref()) {
        Ok(auth) => auth,
        Err(err) => return auth_error_response(err, shape, &trace_id),
    };

    let request = match shape {
        ErrorShape::Claude => {
            match serde_json::from_slice::<claude::types::CreateMessageRequest>(&body) {
                Ok(request) => InboundRequest::Claude(request),
                Err(err) => return bad_request(shape, &trace_id, err),
            }
        }
        ErrorShape::OpenAi => {
            match serde_json::from_slice::<openai::types::ChatCompletionRequest>(&body) {
                Ok(request) => InboundRequest::OpenAi(request),
                Err(err) => return bad_request(shape, &trace_id, err),
            }
        }
    };

    info!(
        trace_id = %trace_id,
        model = request.model(),
        stream = request.wants_stream(),
        "request received"
    );

    match state
        .engine
        .handle(request, auth.credential, trace_id.clone())
        .await
    {
        Ok(EngineOutput::Json(value)) => json_response(StatusCode::OK, &value, &trace_id),
        Ok(EngineOutput::Stream(handle)) => stream_response(handle, &trace_id),
        Err(err) => gateway_error_response(&err, shape, &trace_id),
    }
}

async fn count_tokens(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let trace_id = TraceId::generate();
    if let Err(err) = authenticate(&headers, state.gateway_key.as_deref()) {
        return auth_error_response(err, ErrorShape::Claude, &trace_id);
    }
    let request = match serde_json::from_slice::<claude::types::CountTokensRequest>(&body) {
        Ok(request) => request,
        Err(err) => return bad_request(ErrorShape::Claude, &trace_id, err),
    };
    let input_tokens = estimate_input_tokens(request.system.as_ref(), &request.messages);
    json_response(
        StatusCode::OK,
        &json!(claude::types::CountTokensResponse { input_tokens }),
        &trace_id,
    )
}

#[derive(Debug, Deserialize)]
struct ModelsQuery {
    provider: Option<String>,
}

async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
    headers: HeaderMap,
) -> Response {
    let trace_id = TraceId::generate();
    let auth = match authenticate(&headers, state.gateway_key.as_deref()) {
        Ok(auth) => auth,
        Err(err) => return auth_error_response(err, ErrorShape::OpenAi, &trace_id),
    };
    match state
        .engine
        .list_models(query.provider.as_deref(), auth.credential)
        .await
    {
        Ok(value) => json_response(StatusCode::OK, &value, &trace_id),
        Err(err) => gateway_error_response(&err, ErrorShape::OpenAi, &trace_id),
    }
}

async fn list_aliases(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let trace_id = TraceId::generate();
    if let Err(err) = authenticate(&headers, state.gateway_key.as_deref()) {
        return auth_error_response(err, ErrorShape::OpenAi, &trace_id);
    }

    let registry = state.engine.registry();
    let mut aliases: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut total = 0usize;
    for (name, config) in registry.iter() {
        if config.aliases.is_empty() {
            continue;
        }
        total += config.aliases.len();
        aliases.insert(name.clone(), config.aliases.clone());
    }
    json_response(
        StatusCode::OK,
        &json!({
            "object": "list",
            "aliases": aliases,
            "total": total,
        }),
        &trace_id,
    )
}

async fn healthz(State(state): State<AppState>) -> Response {
    let trace_id = TraceId::generate();
    let registry = state.engine.registry();
    let mut providers = BTreeMap::new();
    for (name, config) in registry.iter() {
        providers.insert(
            name.clone(),
            json!({
                "wire_format": config.wire_format.as_str(),
                "base_url": config.base_url,
                "auth": if config.auth.is_passthrough() { "passthrough" } else { "static_keys" },
                "keys": config.auth.key_count(),
            }),
        );
    }
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "default_provider": registry.default_provider(),
            "client_key_required": state.gateway_key.is_some(),
            "providers": providers,
        }),
        &trace_id,
    )
}

fn json_response(status: StatusCode, value: &serde_json::Value, trace_id: &TraceId) -> Response {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    attach_trace(&mut response, trace_id);
    response
}

fn stream_response(handle: StreamHandle, trace_id: &TraceId) -> Response {
    let mut response = Response::new(Body::from_stream(ReceiverStream::new(handle.receiver)));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(handle.content_type));
    response
        .headers_mut()
        .insert("cache-control", HeaderValue::from_static("no-cache"));
    attach_trace(&mut response, trace_id);
    response
}

fn attach_trace(response: &mut Response, trace_id: &TraceId) {
    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_HEADER, value);
    }
}

fn bad_request(shape: ErrorShape, trace_id: &TraceId, err: serde_json::Error) -> Response {
    error_body_response(
        StatusCode::BAD_REQUEST,
        shape,
        "invalid_request_error",
        &format!("could not parse request body: {err}"),
        trace_id,
    )
}

fn auth_error_response(err: AuthError, shape: ErrorShape, trace_id: &TraceId) -> Response {
    error_body_response(
        StatusCode::UNAUTHORIZED,
        shape,
        "authentication_error",
        err.message(),
        trace_id,
    )
}

fn gateway_error_response(err: &GatewayError, shape: ErrorShape, trace_id: &TraceId) -> Response {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = match err.hint() {
        Some(hint) => format!("{err} ({hint})"),
        None => err.to_string(),
    };
    error_body_response(status, shape, err.kind(), &message, trace_id)
}

fn error_body_response(
    status: StatusCode,
    shape: ErrorShape,
    kind: &str,
    message: &str,
    trace_id: &TraceId,
) -> Response {
    let value = match shape {
        ErrorShape::Claude => json!(claude::types::ErrorBody::new(kind, message)),
        ErrorShape::OpenAi => json!(openai::types::ErrorBody::new(kind, message)),
    };
    json_response(status, &value, trace_id)
}
