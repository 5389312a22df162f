use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{info, warn};

use modelgate_common::{GatewayError, TraceId};
use modelgate_protocol::claude::types as claude;
use modelgate_protocol::openai::types as openai;
use modelgate_provider::{
    AliasResolver, KeyRotator, KeySource, ProviderConfig, ProviderRegistry, ResolvedModel,
    WireFormat,
};
use modelgate_transform::claude2openai;
use modelgate_transform::openai2claude;
use modelgate_transform::openai2claude::stream::OpenAiToClaudeStream;
use modelgate_transform::claude2openai::stream::ClaudeToOpenAiStream;
use modelgate_transform::TransformError;

use crate::client::{HttpMethod, UpstreamBody, UpstreamClient, UpstreamRequest, UpstreamResponse};
use crate::metrics::{MetricsSink, RequestOutcome, TokenCounts};
use crate::relay::{FinalizeGuard, RelayConverter, run_relay};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Claude,
    OpenAi,
}

/// A parsed inbound request in the client's protocol.
#[derive(Debug, Clone)]
pub enum InboundRequest {
    Claude(claude::CreateMessageRequest),
    OpenAi(openai::ChatCompletionRequest),
}

impl InboundRequest {
    pub fn model(&self) -> &str {
        match self {
            InboundRequest::Claude(request) => &request.model,
            InboundRequest::OpenAi(request) => &request.model,
        }
    }

    pub fn wants_stream(&self) -> bool {
        match self {
            InboundRequest::Claude(request) => request.stream.unwrap_or(false),
            InboundRequest::OpenAi(request) => request.stream.unwrap_or(false),
        }
    }

    fn protocol(&self) -> Protocol {
        match self {
            InboundRequest::Claude(_) => Protocol::Claude,
            InboundRequest::OpenAi(_) => Protocol::OpenAi,
        }
    }
}

/// Streamed response handed to the HTTP layer.
pub struct StreamHandle {
    pub content_type: &'static str,
    pub receiver: mpsc::Receiver<Result<Bytes, std::io::Error>>,
}

pub enum EngineOutput {
    Json(serde_json::Value),
    Stream(StreamHandle),
}

/// Top-level request coordinator: resolve the model, pick keys, dispatch
/// with retry and rotation, then convert or relay the response.
pub struct Engine {
    registry: Arc<ProviderRegistry>,
    resolver: AliasResolver,
    rotator: KeyRotator,
    client: Arc<dyn UpstreamClient>,
    metrics: Arc<dyn MetricsSink>,
}

impl Engine {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        client: Arc<dyn UpstreamClient>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            resolver: AliasResolver::new(registry.clone()),
            rotator: KeyRotator::new(),
            registry,
            client,
            metrics,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &AliasResolver {
        &self.resolver
    }

    pub fn rotator(&self) -> &KeyRotator {
        &self.rotator
    }

    pub async fn handle(
        &self,
        request: InboundRequest,
        client_key: Option<String>,
        trace_id: TraceId,
    ) -> Result<EngineOutput, GatewayError> {
        let model_token = request.model().to_string();
        let resolved =
            self.resolver
                .resolve(&model_token)
                .map_err(|err| GatewayError::UnresolvedModel {
                    model: model_token.clone(),
                    reason: err.to_string(),
                })?;
        let config =
            self.registry
                .get(&resolved.provider)
                .ok_or_else(|| GatewayError::UnresolvedModel {
                    model: model_token.clone(),
                    reason: format!("provider '{}' is not configured", resolved.provider),
                })?;

        info!(
            trace_id = %trace_id,
            model = %model_token,
            provider = %resolved.provider,
            upstream_model = %resolved.model,
            hops = resolved.hops,
            stream = request.wants_stream(),
            "request resolved"
        );

        let mut guard = Some(FinalizeGuard::new(
            self.metrics.clone(),
            trace_id.as_str(),
            resolved.provider.clone(),
            resolved.model.clone(),
        ));

        let result = self
            .dispatch(&request, &config, &resolved, client_key, &trace_id, &mut guard)
            .await;

        if let Err(err) = &result
            && let Some(guard) = guard.take()
        {
            warn!(trace_id = %trace_id, kind = err.kind(), error = %err, "request failed");
            guard.finish(
                RequestOutcome::Failed,
                Some(err.kind().to_string()),
                TokenCounts::default(),
            );
        }
        result
    }

    async fn dispatch(
        &self,
        request: &InboundRequest,
        config: &ProviderConfig,
        resolved: &ResolvedModel,
        client_key: Option<String>,
        trace_id: &TraceId,
        guard: &mut Option<FinalizeGuard>,
    ) -> Result<EngineOutput, GatewayError> {
        let wants_stream = request.wants_stream();
        let body = build_upstream_body(request, config, resolved, wants_stream)?;
        let url = upstream_url(config);
        let passthrough = config.auth.is_passthrough();
        let mut excluded: HashSet<String> = HashSet::new();

        let response = loop {
            let key = if passthrough {
                client_key
                    .clone()
                    .ok_or_else(|| GatewayError::PassthroughKeyRequired {
                        provider: config.name.clone(),
                    })?
            } else {
                self.rotator.next_key(config, &excluded).map_err(|_| {
                    GatewayError::AllKeysExhausted {
                        provider: config.name.clone(),
                    }
                })?
            };

            let upstream_request = UpstreamRequest {
                method: HttpMethod::Post,
                url: url.clone(),
                headers: upstream_headers(config, &key),
                body: Some(body.clone()),
                want_stream: wants_stream,
            };

            let response = self
                .send_with_retries(config, upstream_request, trace_id)
                .await?;

            match response.status {
                status @ (401 | 403 | 429) => {
                    if passthrough {
                        // Nothing to rotate; the credential is the client's.
                        if status == 429 {
                            let body = read_body(response.body).await;
                            return Err(GatewayError::UpstreamRejected {
                                status,
                                body: String::from_utf8_lossy(&body).into_owned(),
                            });
                        }
                        return Err(GatewayError::UpstreamAuth { status });
                    }
                    warn!(
                        trace_id = %trace_id,
                        provider = %config.name,
                        status,
                        tried = excluded.len() + 1,
                        "upstream rejected key; rotating"
                    );
                    excluded.insert(key);
                    continue;
                }
                status if !(200..300).contains(&status) => {
                    let body = read_body(response.body).await;
                    return Err(GatewayError::UpstreamRejected {
                        status,
                        body: String::from_utf8_lossy(&body).into_owned(),
                    });
                }
                _ => break response,
            }
        };

        if wants_stream {
            self.start_relay(request.protocol(), config, response, guard)
        } else {
            let body = read_body(response.body).await;
            let (value, tokens) = convert_response_body(request.protocol(), config, &body)?;
            if let Some(guard) = guard.take() {
                guard.finish(RequestOutcome::Completed, None, tokens);
            }
            Ok(EngineOutput::Json(value))
        }
    }

    /// Per-attempt timeouts are a retry trigger: the same key is retried up
    /// to the provider's budget before the request fails as unavailable.
    async fn send_with_retries(
        &self,
        config: &ProviderConfig,
        request: UpstreamRequest,
        trace_id: &TraceId,
    ) -> Result<UpstreamResponse, GatewayError> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let outcome =
                tokio::time::timeout(config.timeout, self.client.send(request.clone())).await;
            let error = match outcome {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(error)) => error,
                Err(_) => crate::client::TransportError::timeout("attempt deadline exceeded"),
            };
            warn!(
                trace_id = %trace_id,
                provider = %config.name,
                attempt = attempts,
                error = %error,
                "upstream attempt failed"
            );
            if error.is_retryable() && attempts <= config.max_retries {
                continue;
            }
            return Err(GatewayError::UpstreamUnavailable {
                provider: config.name.clone(),
                attempts,
                reason: error.to_string(),
            });
        }
    }

    fn start_relay(
        &self,
        protocol: Protocol,
        config: &ProviderConfig,
        response: UpstreamResponse,
        guard: &mut Option<FinalizeGuard>,
    ) -> Result<EngineOutput, GatewayError> {
        let upstream_rx = match response.body {
            UpstreamBody::Stream(rx) => rx,
            UpstreamBody::Full(bytes) => {
                // Upstream answered with a buffered SSE body; feed it through
                // a channel so the relay path stays uniform.
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move {
                    let _ = tx.send(bytes).await;
                });
                rx
            }
        };

        let converter = match (protocol, config.wire_format) {
            (Protocol::Claude, WireFormat::OpenAI) => {
                RelayConverter::OpenAiToClaude(OpenAiToClaudeStream::new())
            }
            (Protocol::Claude, WireFormat::Anthropic) => RelayConverter::ClaudePassthrough {
                message_stopped: false,
            },
            (Protocol::OpenAi, WireFormat::Anthropic) => {
                RelayConverter::ClaudeToOpenAi(ClaudeToOpenAiStream::new(now_epoch_seconds()))
            }
            (Protocol::OpenAi, WireFormat::OpenAI) => RelayConverter::OpenAiPassthrough,
        };

        let (client_tx, client_rx) = mpsc::channel(32);
        let guard = guard
            .take()
            .expect("finalize guard consumed before relay start");
        tokio::spawn(run_relay(upstream_rx, converter, client_tx, guard));

        Ok(EngineOutput::Stream(StreamHandle {
            content_type: RelayConverter::CONTENT_TYPE,
            receiver: client_rx,
        }))
    }

    /// Forward a model-listing request to the provider's models endpoint.
    pub async fn list_models(
        &self,
        provider: Option<&str>,
        client_key: Option<String>,
    ) -> Result<serde_json::Value, GatewayError> {
        let name = provider.unwrap_or_else(|| self.registry.default_provider());
        let config = self
            .registry
            .get(name)
            .ok_or_else(|| GatewayError::UnresolvedModel {
                model: name.to_string(),
                reason: format!("provider '{name}' is not configured"),
            })?;

        let key = match &config.auth {
            KeySource::Passthrough => {
                client_key.ok_or_else(|| GatewayError::PassthroughKeyRequired {
                    provider: config.name.clone(),
                })?
            }
            KeySource::Static(_) => self
                .rotator
                .next_key(&config, &HashSet::new())
                .map_err(|_| GatewayError::AllKeysExhausted {
                    provider: config.name.clone(),
                })?,
        };

        let url = match config.wire_format {
            WireFormat::OpenAI => format!("{}/models", config.base_url.trim_end_matches('/')),
            WireFormat::Anthropic => {
                format!("{}/v1/models", config.base_url.trim_end_matches('/'))
            }
        };
        let request = UpstreamRequest {
            method: HttpMethod::Get,
            url,
            headers: upstream_headers(&config, &key),
            body: None,
            want_stream: false,
        };

        let response = tokio::time::timeout(config.timeout, self.client.send(request))
            .await
            .map_err(|_| GatewayError::UpstreamUnavailable {
                provider: config.name.clone(),
                attempts: 1,
                reason: "attempt deadline exceeded".to_string(),
            })?
            .map_err(|err| GatewayError::UpstreamUnavailable {
                provider: config.name.clone(),
                attempts: 1,
                reason: err.to_string(),
            })?;

        let body = read_body(response.body).await;
        if !(200..300).contains(&response.status) {
            return Err(GatewayError::UpstreamRejected {
                status: response.status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        serde_json::from_slice(&body).map_err(|err| GatewayError::Conversion {
            field: "models".to_string(),
            reason: err.to_string(),
        })
    }
}

fn build_upstream_body(
    request: &InboundRequest,
    config: &ProviderConfig,
    resolved: &ResolvedModel,
    wants_stream: bool,
) -> Result<Bytes, GatewayError> {
    let value = match (request, config.wire_format) {
        (InboundRequest::Claude(inbound), WireFormat::Anthropic) => {
            let mut upstream = inbound.clone();
            upstream.model = resolved.model.clone();
            upstream.stream = wants_stream.then_some(true);
            serde_json::to_vec(&upstream)
        }
        (InboundRequest::Claude(inbound), WireFormat::OpenAI) => {
            let mut upstream = claude2openai::request::transform_request(inbound.clone());
            upstream.model = resolved.model.clone();
            if wants_stream {
                upstream.stream = Some(true);
                upstream.stream_options = Some(openai::StreamOptions {
                    include_usage: Some(true),
                });
            }
            serde_json::to_vec(&upstream)
        }
        (InboundRequest::OpenAi(inbound), WireFormat::OpenAI) => {
            let mut upstream = inbound.clone();
            upstream.model = resolved.model.clone();
            if wants_stream && upstream.stream_options.is_none() {
                upstream.stream_options = Some(openai::StreamOptions {
                    include_usage: Some(true),
                });
            }
            serde_json::to_vec(&upstream)
        }
        (InboundRequest::OpenAi(inbound), WireFormat::Anthropic) => {
            let mut upstream = openai2claude::request::transform_request(inbound.clone())
                .map_err(transform_error)?;
            upstream.model = resolved.model.clone();
            upstream.stream = wants_stream.then_some(true);
            serde_json::to_vec(&upstream)
        }
    };
    value.map(Bytes::from).map_err(|err| GatewayError::Conversion {
        field: "request".to_string(),
        reason: err.to_string(),
    })
}

fn convert_response_body(
    protocol: Protocol,
    config: &ProviderConfig,
    body: &[u8],
) -> Result<(serde_json::Value, TokenCounts), GatewayError> {
    match (protocol, config.wire_format) {
        (Protocol::Claude, WireFormat::Anthropic) => {
            let message: claude::Message = decode(body, "message")?;
            let tokens = claude_tokens(&message.usage);
            Ok((to_value(&message)?, tokens))
        }
        (Protocol::Claude, WireFormat::OpenAI) => {
            let upstream: openai::ChatCompletionResponse = decode(body, "chat.completion")?;
            let message =
                openai2claude::response::transform_response(upstream).map_err(transform_error)?;
            let tokens = claude_tokens(&message.usage);
            Ok((to_value(&message)?, tokens))
        }
        (Protocol::OpenAi, WireFormat::OpenAI) => {
            let upstream: openai::ChatCompletionResponse = decode(body, "chat.completion")?;
            let tokens = openai_tokens(upstream.usage.as_ref());
            Ok((to_value(&upstream)?, tokens))
        }
        (Protocol::OpenAi, WireFormat::Anthropic) => {
            let message: claude::Message = decode(body, "message")?;
            let tokens = claude_tokens(&message.usage);
            let response = claude2openai::response::transform_response(message);
            Ok((to_value(&response)?, tokens))
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    body: &[u8],
    field: &'static str,
) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|err| GatewayError::Conversion {
        field: field.to_string(),
        reason: err.to_string(),
    })
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, GatewayError> {
    serde_json::to_value(value).map_err(|err| GatewayError::Conversion {
        field: "response".to_string(),
        reason: err.to_string(),
    })
}

fn transform_error(err: TransformError) -> GatewayError {
    GatewayError::Conversion {
        field: err.field().to_string(),
        reason: err.to_string(),
    }
}

fn claude_tokens(usage: &claude::Usage) -> TokenCounts {
    TokenCounts {
        input: usage.input_tokens as u64,
        output: usage.output_tokens as u64,
        cache_read: usage.cache_read_input_tokens as u64,
        cache_creation: usage.cache_creation_input_tokens as u64,
    }
}

fn openai_tokens(usage: Option<&openai::CompletionUsage>) -> TokenCounts {
    match usage {
        Some(usage) => TokenCounts {
            input: usage.prompt_tokens as u64,
            output: usage.completion_tokens as u64,
            cache_read: usage.prompt_tokens_details.cached_tokens as u64,
            cache_creation: 0,
        },
        None => TokenCounts::default(),
    }
}

fn upstream_url(config: &ProviderConfig) -> String {
    let base = config.base_url.trim_end_matches('/');
    match config.wire_format {
        WireFormat::OpenAI => format!("{base}/chat/completions"),
        WireFormat::Anthropic => format!("{base}/v1/messages"),
    }
}

fn upstream_headers(config: &ProviderConfig, key: &str) -> Vec<(String, String)> {
    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    match config.wire_format {
        WireFormat::Anthropic => {
            headers.push(("x-api-key".to_string(), key.to_string()));
            headers.push((
                "anthropic-version".to_string(),
                ANTHROPIC_VERSION.to_string(),
            ));
        }
        WireFormat::OpenAI => {
            headers.push(("authorization".to_string(), format!("Bearer {key}")));
        }
    }
    for (name, value) in &config.custom_headers {
        headers.push((name.clone(), value.clone()));
    }
    headers
}

async fn read_body(body: UpstreamBody) -> Bytes {
    match body {
        UpstreamBody::Full(bytes) => bytes,
        UpstreamBody::Stream(mut rx) => {
            let mut collected = Vec::new();
            while let Some(chunk) = rx.recv().await {
                collected.extend_from_slice(&chunk);
            }
            Bytes::from(collected)
        }
    }
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or_default()
}
