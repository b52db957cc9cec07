use crate::error::ExportError;
use crate::span::SpanRecord;
use crate::transport::EncodedBatch;
use serde::Serialize;

/// Converts span records into the wire form handed to a transport.
pub trait Encoder: Send + Sync {
    fn encode(&self, spans: &[SpanRecord]) -> Result<EncodedBatch, ExportError>;

    /// Content type of the produced payload.
    fn content_type(&self) -> &'static str;
}

/// JSON request body shaped like an OTLP/JSON trace export.
#[derive(Serialize)]
struct ExportRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    service_name: Option<&'a str>,
    spans: &'a [SpanRecord],
}

/// Encodes batches as JSON with `serde_json`.
#[derive(Debug, Clone, Default)]
pub struct JsonEncoder {
    service_name: Option<String>,
}

impl JsonEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

impl Encoder for JsonEncoder {
    fn encode(&self, spans: &[SpanRecord]) -> Result<EncodedBatch, ExportError> {
        let request = ExportRequest {
            service_name: self.service_name.as_deref(),
            spans,
        };
        let payload =
            serde_json::to_vec(&request).map_err(|e| ExportError::Encode(e.to_string()))?;
        Ok(EncodedBatch::new(payload, spans.len() as u64))
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}
