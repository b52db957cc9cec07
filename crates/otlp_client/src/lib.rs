//! OTLP Trace Export Client
//!
//! The resilience and lifecycle core of an OpenTelemetry trace exporter:
//! jittered exponential backoff, a retry engine driven by a pluggable
//! classifier, partial-success accounting, and a client whose `start`,
//! `stop` and `upload` are safe to call from any number of tasks at once.
//!
//! The wire transport is a seam: implement [`Transport`] (native async fn in
//! traits, no `#[async_trait]`) and hand the client either a [`Dialer`] or a
//! ready-made transport.
//!
//! # Example
//!
//! ```ignore
//! let metrics = Arc::new(UploadMetrics::new());
//! let client = Arc::new(
//!     Client::builder(ClientConfig::from_env())
//!         .with_dialer(|config: &ClientConfig| MyTransport::connect(config))
//!         .with_observer(metrics.clone())
//!         .build()?,
//! );
//!
//! client.start(&Scope::new()).await?;
//! client.upload(&Scope::new(), &batch).await?;
//! client.stop(&Scope::with_timeout(Duration::from_secs(5))).await?;
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod encoder;
pub mod error;
pub mod exporter;
pub mod observer;
pub mod partial;
pub mod retry;
pub mod scope;
pub mod span;
pub mod transport;

// Re-export main types
pub use backoff::{Backoff, TokioWaiter, Waiter, WaiterBoxed};
pub use client::{Client, ClientBuilder, ClientState, InFlightCounter};
pub use config::{ClientConfig, Compression, ConfigError, RetryConfig};
pub use encoder::{Encoder, JsonEncoder};
pub use error::{CancelReason, ExportError, StatusCode, TransportError};
pub use exporter::TraceExporter;
pub use observer::{
    NoopObserver, UploadMetrics, UploadObserver, UploadReport, DURATION_BUCKETS_MS,
};
pub use partial::{Accounting, PartialSuccess};
pub use retry::{RetryClassifier, RetryDecision, Retrier, StatusClassifier};
pub use scope::{Scope, ScopeGuard};
pub use span::{AttributeValue, SpanKind, SpanRecord, SpanStatus};
pub use transport::{
    Dialer, EncodedBatch, ExportResponse, NullTransport, SendOutcome, Transport, TransportBoxed,
};
