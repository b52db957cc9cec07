//! Span-level facade over [`Client`].
//!
//! [`TraceExporter`] owns the once-only start and shutdown bookkeeping so
//! callers can wire it into a span pipeline without tracking client state.

use crate::client::Client;
use crate::encoder::{Encoder, JsonEncoder};
use crate::error::ExportError;
use crate::scope::Scope;
use crate::span::SpanRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Encodes span records and uploads them through a shared client.
pub struct TraceExporter {
    client: Arc<Client>,
    encoder: Arc<dyn Encoder>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl std::fmt::Debug for TraceExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceExporter")
            .field("client", &self.client)
            .field("content_type", &self.encoder.content_type())
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl TraceExporter {
    /// Exporter using [`JsonEncoder`].
    pub fn new(client: Arc<Client>) -> Self {
        Self::with_encoder(client, Arc::new(JsonEncoder::new()))
    }

    pub fn with_encoder(client: Arc<Client>, encoder: Arc<dyn Encoder>) -> Self {
        Self {
            client,
            encoder,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Starts the client. Once a start succeeds, later calls are rejected.
    ///
    /// A failed start (for example a dial error) may be retried.
    pub async fn start(&self, scope: &Scope) -> Result<(), ExportError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ExportError::AlreadyStarted);
        }
        let result = self.client.start(scope).await;
        if result.is_err() {
            self.started.store(false, Ordering::Release);
        }
        result
    }

    /// Encodes and uploads `spans`. An empty slice is a no-op.
    pub async fn export(&self, scope: &Scope, spans: &[SpanRecord]) -> Result<(), ExportError> {
        if spans.is_empty() {
            return Ok(());
        }
        let batch = self.encoder.encode(spans)?;
        trace!(records = batch.record_count, bytes = batch.payload.len(), "exporting spans");
        self.client.upload(scope, &batch).await
    }

    /// Stops the client once. A no-op if the exporter was never started.
    pub async fn shutdown(&self, scope: &Scope) -> Result<(), ExportError> {
        if !self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.client.stop(scope).await
    }
}
