use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A trace submission payload: traces, each an ordered sequence of spans.
pub type TracePayload = Vec<Vec<SpanRecord>>;

/// A single span in the v0.4 trace wire format.
///
/// Spans are submitted as msgpack maps keyed by field name; use
/// `rmp_serde::to_vec_named` when encoding test payloads so the map form is
/// preserved on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: u64,
    pub span_id: u64,
    #[serde(default)]
    pub parent_id: u64,
    pub name: String,
    pub resource: String,
    pub service: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub span_type: Option<String>,
    #[serde(default)]
    pub error: i32,
    pub start: i64,
    pub duration: i64,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

/// One decoded payload delivered by the agent.
///
/// Created per HTTP request, emitted to every registered assertion, and not
/// retained afterwards.
#[derive(Debug, Clone)]
pub struct CollectedMessage {
    /// Request headers, lowercased names.
    pub headers: HashMap<String, String>,
    pub payload: Payload,
    /// Decoded multipart attachments; empty except for profiling uploads.
    pub files: Vec<ProfileAttachment>,
}

impl CollectedMessage {
    /// Returns the decoded traces if this message came from a trace submission.
    pub fn traces(&self) -> Option<&TracePayload> {
        match &self.payload {
            Payload::Traces(traces) => Some(traces),
            _ => None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// The decoded body of a [`CollectedMessage`], by ingestion endpoint.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A msgpack trace submission.
    Traces(TracePayload),
    /// The text fields of a profiling upload.
    Profile(serde_json::Value),
    /// An OTLP trace export.
    Otlp(ExportTraceServiceRequest),
}

/// A decoded multipart file part from a profiling upload.
#[derive(Debug, Clone)]
pub struct ProfileAttachment {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// One decoded telemetry submission.
#[derive(Debug, Clone)]
pub struct TelemetryMessage {
    /// Request headers, lowercased names.
    pub headers: HashMap<String, String>,
    pub payload: TelemetryPayload,
}

/// A telemetry body, tagged with its `request_type` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub request_type: String,
    #[serde(flatten)]
    pub body: serde_json::Value,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_span() -> SpanRecord {
        SpanRecord {
            trace_id: 0x1234_5678_9abc_def0,
            span_id: 42,
            parent_id: 7,
            name: "web.request".to_string(),
            resource: "GET /users".to_string(),
            service: "users-api".to_string(),
            span_type: Some("web".to_string()),
            error: 0,
            start: 1_700_000_000_000_000_000,
            duration: 12_345_678,
            meta: HashMap::from([("http.method".to_string(), "GET".to_string())]),
            metrics: HashMap::from([("_dd.measured".to_string(), 1.0)]),
        }
    }

    #[test]
    fn test_trace_payload_round_trips_through_msgpack() {
        let payload: TracePayload = vec![vec![sample_span()]];
        let bytes = rmp_serde::to_vec_named(&payload).unwrap();
        let decoded: TracePayload = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_span_without_optional_fields_round_trips() {
        let span = SpanRecord {
            span_type: None,
            meta: HashMap::new(),
            metrics: HashMap::new(),
            ..sample_span()
        };
        let bytes = rmp_serde::to_vec_named(&vec![vec![span.clone()]]).unwrap();
        let decoded: TracePayload = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded[0][0], span);
    }

    #[test]
    fn test_span_decodes_with_missing_defaults() {
        // A minimal span as a client might send it: no parent, no error flag.
        let raw = serde_json::json!({
            "trace_id": 1u64,
            "span_id": 2u64,
            "name": "db.query",
            "resource": "SELECT 1",
            "service": "postgres",
            "start": 100i64,
            "duration": 5i64,
        });
        let bytes = rmp_serde::to_vec_named(&raw).unwrap();
        let decoded: SpanRecord = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.parent_id, 0);
        assert_eq!(decoded.error, 0);
        assert!(decoded.span_type.is_none());
        assert!(decoded.meta.is_empty());
    }

    #[test]
    fn test_telemetry_payload_keeps_body_fields() {
        let payload: TelemetryPayload = serde_json::from_value(serde_json::json!({
            "request_type": "app-started",
            "api_version": "v2",
            "payload": { "products": {} },
        }))
        .unwrap();
        assert_eq!(payload.request_type, "app-started");
        assert_eq!(payload.body["api_version"], "v2");
    }
}
