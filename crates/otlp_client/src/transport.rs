use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::partial::PartialSuccess;
use crate::scope::Scope;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A batch of already-encoded trace records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedBatch {
    /// Wire-ready request body.
    pub payload: Vec<u8>,
    /// Number of span records encoded in `payload`.
    pub record_count: u64,
}

impl EncodedBatch {
    pub fn new(payload: Vec<u8>, record_count: u64) -> Self {
        Self {
            payload,
            record_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }
}

/// What the collector sent back for one export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportResponse {
    pub partial_success: Option<PartialSuccess>,
}

impl ExportResponse {
    pub fn partial(rejected_count: i64, message: impl Into<String>) -> Self {
        Self {
            partial_success: Some(PartialSuccess::new(rejected_count, message)),
        }
    }
}

/// Result of one transport round-trip.
///
/// A collector can reply with a response body and a failing status at the
/// same time, so both are carried independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub response: Option<ExportResponse>,
    pub status: Result<(), TransportError>,
}

impl SendOutcome {
    pub fn ok(response: ExportResponse) -> Self {
        Self {
            response: Some(response),
            status: Ok(()),
        }
    }

    pub fn err(error: TransportError) -> Self {
        Self {
            response: None,
            status: Err(error),
        }
    }

    pub fn new(response: Option<ExportResponse>, status: Result<(), TransportError>) -> Self {
        Self { response, status }
    }
}

/// A connection capable of delivering encoded batches to a collector.
///
/// # Note on Object Safety
///
/// This trait uses `impl Future` return types which are not object-safe.
/// The client stores transports as `Arc<dyn TransportBoxed>`; every
/// `Transport` gets that for free through the blanket implementation.
pub trait Transport: Send + Sync {
    /// Performs exactly one export round-trip.
    fn send(&self, scope: &Scope, batch: &EncodedBatch) -> impl Future<Output = SendOutcome> + Send;

    /// Releases the connection. Only called for transports the client dialed.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send {
        async { Ok(()) }
    }

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`Transport`] for dynamic dispatch.
pub trait TransportBoxed: Send + Sync {
    fn send_boxed<'a>(
        &'a self,
        scope: &'a Scope,
        batch: &'a EncodedBatch,
    ) -> Pin<Box<dyn Future<Output = SendOutcome> + Send + 'a>>;

    fn close_boxed(&self) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    fn name(&self) -> &str;
}

impl<T: Transport> TransportBoxed for T {
    fn send_boxed<'a>(
        &'a self,
        scope: &'a Scope,
        batch: &'a EncodedBatch,
    ) -> Pin<Box<dyn Future<Output = SendOutcome> + Send + 'a>> {
        Box::pin(self.send(scope, batch))
    }

    fn close_boxed(&self) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(self.close())
    }

    fn name(&self) -> &str {
        Transport::name(self)
    }
}

/// Creates the transport a client owns.
///
/// Called once by `Client::start`; the client closes what it dials.
pub trait Dialer: Send + Sync {
    fn dial(&self, config: &ClientConfig) -> Result<Arc<dyn TransportBoxed>, TransportError>;
}

impl<F, T> Dialer for F
where
    F: Fn(&ClientConfig) -> Result<T, TransportError> + Send + Sync,
    T: Transport + 'static,
{
    fn dial(&self, config: &ClientConfig) -> Result<Arc<dyn TransportBoxed>, TransportError> {
        let transport = self(config)?;
        Ok(Arc::new(transport))
    }
}

/// Transport that accepts every batch without sending it anywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for NullTransport {
    async fn send(&self, _scope: &Scope, _batch: &EncodedBatch) -> SendOutcome {
        SendOutcome::ok(ExportResponse::default())
    }

    fn name(&self) -> &str {
        "null"
    }
}
