use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{post, put},
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use crate::agent::messages::{
    CollectedMessage, Payload, ProfileAttachment, TelemetryMessage, TelemetryPayload, TracePayload,
};
use crate::agent::remote_config::{ConfigRequest, StoredConfigFile, poll_response};
use crate::error::MockAgentError;

/// Shared state handed to every ingestion handler.
#[derive(Clone)]
pub(crate) struct AgentState {
    pub(crate) messages: broadcast::Sender<CollectedMessage>,
    pub(crate) telemetry: broadcast::Sender<TelemetryMessage>,
    pub(crate) remote_config: Arc<RwLock<Vec<StoredConfigFile>>>,
}

pub(crate) fn build_router(state: AgentState) -> Router {
    Router::new()
        .route("/v0.4/traces", put(handle_traces))
        .route(
            "/telemetry/proxy/api/v2/apmtelemetry",
            post(handle_telemetry),
        )
        .route("/profiling/v1/input", post(handle_profiling))
        .route("/v0.7/config", post(handle_remote_config))
        .route("/v1/traces", post(handle_otlp_traces))
        // Trace flushes can be arbitrarily large.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// The fixed acknowledgement the real agent returns for trace submissions.
fn trace_ack() -> Json<Value> {
    Json(serde_json::json!({ "rate_by_service": { "service:,env:": 1 } }))
}

async fn handle_traces(
    State(state): State<AgentState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    // An empty body is the client's idle keepalive, not a flush.
    if body.is_empty() {
        return trace_ack().into_response();
    }

    let payload: TracePayload = match rmp_serde::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode trace payload");
            return (
                StatusCode::BAD_REQUEST,
                format!("failed to decode trace payload: {e}"),
            )
                .into_response();
        }
    };

    let _ = state.messages.send(CollectedMessage {
        headers: collect_headers(&headers),
        payload: Payload::Traces(payload),
        files: Vec::new(),
    });

    trace_ack().into_response()
}

async fn handle_telemetry(
    State(state): State<AgentState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let payload: TelemetryPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode telemetry payload");
            return (
                StatusCode::BAD_REQUEST,
                format!("failed to decode telemetry payload: {e}"),
            )
                .into_response();
        }
    };

    let _ = state.telemetry.send(TelemetryMessage {
        headers: collect_headers(&headers),
        payload,
    });

    StatusCode::OK.into_response()
}

async fn handle_profiling(
    State(state): State<AgentState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut fields = serde_json::Map::new();
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read profiling multipart body");
                return (
                    StatusCode::BAD_REQUEST,
                    format!("failed to read multipart body: {e}"),
                )
                    .into_response();
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("failed to read multipart field: {e}"),
                )
                    .into_response();
            }
        };

        if file_name.is_some() {
            files.push(ProfileAttachment {
                name,
                file_name,
                content_type,
                bytes: bytes.to_vec(),
            });
        } else {
            fields.insert(
                name,
                Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            );
        }
    }

    let _ = state.messages.send(CollectedMessage {
        headers: collect_headers(&headers),
        payload: Payload::Profile(Value::Object(fields)),
        files,
    });

    StatusCode::OK.into_response()
}

async fn handle_remote_config(
    State(state): State<AgentState>,
    body: Bytes,
) -> impl IntoResponse {
    let request: ConfigRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode remote config request");
            return (
                StatusCode::BAD_REQUEST,
                format!("failed to decode remote config request: {e}"),
            )
                .into_response();
        }
    };

    let files = state.remote_config.read().await;
    Json(poll_response(&files, &request)).into_response()
}

// OTLP encoding, selected per request by content-type.
#[derive(Clone, Copy, Debug)]
enum OtlpEncoding {
    Json,
    Protobuf,
}

impl OtlpEncoding {
    fn from_headers(headers: &HeaderMap) -> Self {
        match headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
        {
            Some(ct) if ct.starts_with("application/json") => OtlpEncoding::Json,
            _ => OtlpEncoding::Protobuf,
        }
    }

    fn decode(&self, body: &[u8]) -> Result<ExportTraceServiceRequest, MockAgentError> {
        match self {
            OtlpEncoding::Json => serde_json::from_slice(body).map_err(MockAgentError::JsonDecode),
            OtlpEncoding::Protobuf => {
                prost::Message::decode(body).map_err(MockAgentError::ProtobufDecode)
            }
        }
    }

    fn encode(&self, response: &ExportTraceServiceResponse) -> Result<Vec<u8>, MockAgentError> {
        match self {
            OtlpEncoding::Json => serde_json::to_vec(response).map_err(MockAgentError::JsonDecode),
            OtlpEncoding::Protobuf => {
                let mut buf = Vec::new();
                prost::Message::encode(response, &mut buf)
                    .map_err(|e| MockAgentError::Encode(e.to_string()))?;
                Ok(buf)
            }
        }
    }

    fn content_type(&self) -> &'static str {
        match self {
            OtlpEncoding::Json => "application/json",
            OtlpEncoding::Protobuf => "application/x-protobuf",
        }
    }
}

async fn handle_otlp_traces(
    State(state): State<AgentState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let encoding = OtlpEncoding::from_headers(&headers);

    let request = match encoding.decode(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode OTLP trace export");
            return (
                StatusCode::BAD_REQUEST,
                format!("failed to parse request: {e}"),
            )
                .into_response();
        }
    };

    let _ = state.messages.send(CollectedMessage {
        headers: collect_headers(&headers),
        payload: Payload::Otlp(request),
        files: Vec::new(),
    });

    let response = ExportTraceServiceResponse {
        partial_success: None,
    };
    match encoding.encode(&response) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoding.content_type())],
            bytes,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode response: {e}"),
        )
            .into_response(),
    }
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}
