//! Export Lifecycle
//!
//! [`Client`] drives a transport through `Unstarted -> Started -> Stopped`
//! while many tasks upload concurrently.
//!
//! # Coordination
//!
//! ```text
//!  upload ─┬─ in_flight += n
//!          ├─ lifecycle.read()      (queues behind a waiting stop)
//!          ├─ state != Started  ──► NotStarted / Shutdown
//!          ├─ scope = merge(caller, shutdown, timeout)
//!          ├─ retrier.request(send + account)
//!          └─ in_flight -= n, release read
//!
//!  stop ───┬─ lifecycle.write()  raced against the caller's scope
//!          │     scope fires first ──► shutdown.cancel(), keep waiting
//!          ├─ state == Stopped   ──► AlreadyStopped
//!          ├─ state = Stopped, close owned transport
//!          └─ shutdown.cancel()
//! ```
//!
//! Tokio's `RwLock` is fair: once `stop` is queued for the write lock, newly
//! arriving uploads queue behind it. Uploads already holding the read lock
//! finish (or unwind on the shutdown signal) before `stop` proceeds, so no
//! round-trip ever starts on a transport that `stop` has closed.

use crate::backoff::{Backoff, WaiterBoxed};
use crate::config::{ClientConfig, ConfigError};
use crate::error::{CancelReason, ExportError};
use crate::observer::{NoopObserver, UploadObserver, UploadReport};
use crate::partial::{account, succeeded_count};
use crate::retry::{RetryClassifier, Retrier};
use crate::scope::Scope;
use crate::transport::{Dialer, EncodedBatch, TransportBoxed};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lifecycle state of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unstarted,
    Started,
    Stopped,
}

/// Count of records submitted to `upload` but not yet resolved.
///
/// Observability only; never consulted to decide whether `stop` may proceed.
#[derive(Debug, Default)]
pub struct InFlightCounter {
    records: CachePadded<AtomicU64>,
}

impl InFlightCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Adds `n` records; they are removed when the guard drops.
    pub fn track(&self, n: u64) -> InFlightGuard<'_> {
        self.records.fetch_add(n, Ordering::Relaxed);
        InFlightGuard { counter: self, n }
    }
}

/// Removes tracked records from the counter on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    counter: &'a InFlightCounter,
    n: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.records.fetch_sub(self.n, Ordering::Relaxed);
    }
}

/// State guarded by the coordination lock.
struct Lifecycle {
    state: ClientState,
    transport: Option<Arc<dyn TransportBoxed>>,
    /// `true` when the client dialed the transport and must close it.
    owned: bool,
}

/// Where the client gets its transport from.
enum TransportSource {
    Dial(Arc<dyn Dialer>),
    External(Arc<dyn TransportBoxed>),
}

/// Export client shared by every uploading task.
///
/// Wrap it in an `Arc` to share across tasks; all methods take `&self`.
pub struct Client {
    config: ClientConfig,
    source: TransportSource,
    retrier: Retrier,
    observer: Arc<dyn UploadObserver>,
    lifecycle: RwLock<Lifecycle>,
    /// Fired on stop; every upload scope is linked to it.
    shutdown: Scope,
    in_flight: InFlightCounter,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.config.endpoint)
            .field("in_flight", &self.in_flight.get())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Start building a client.
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Records currently in flight across all uploads.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.get()
    }

    /// Current lifecycle state.
    ///
    /// Waits for the coordination lock, so it reflects a settled state.
    pub async fn state(&self) -> ClientState {
        self.lifecycle.read().await.state
    }

    /// Establishes the transport and moves to `Started`.
    ///
    /// An external transport is reused and never closed by the client.
    pub async fn start(&self, scope: &Scope) -> Result<(), ExportError> {
        let mut lifecycle = tokio::select! {
            biased;
            guard = self.lifecycle.write() => guard,
            reason = scope.cancelled() => return Err(ExportError::cancelled(reason)),
        };

        match lifecycle.state {
            ClientState::Started => return Err(ExportError::AlreadyStarted),
            ClientState::Stopped => return Err(ExportError::Shutdown),
            ClientState::Unstarted => {}
        }

        let (transport, owned) = match &self.source {
            TransportSource::External(transport) => (Arc::clone(transport), false),
            TransportSource::Dial(dialer) => (dialer.dial(&self.config)?, true),
        };

        debug!(
            endpoint = %self.config.endpoint,
            transport = transport.name(),
            owned,
            "export client started"
        );

        lifecycle.transport = Some(transport);
        lifecycle.owned = owned;
        lifecycle.state = ClientState::Started;
        Ok(())
    }

    /// Uploads one encoded batch.
    ///
    /// Retries transient failures per the retry configuration. The per-call
    /// scope fires when the caller's scope fires, when the export timeout
    /// elapses, or when the client shuts down.
    pub async fn upload(&self, scope: &Scope, batch: &EncodedBatch) -> Result<(), ExportError> {
        let started = Instant::now();
        let submitted = batch.record_count;

        let result = {
            let _in_flight = self.in_flight.track(submitted);
            self.upload_tracked(scope, batch).await
        };

        self.observer.upload_finished(&UploadReport {
            submitted,
            succeeded: succeeded_count(submitted, result.as_ref().err()),
            duration: started.elapsed(),
            error: result.as_ref().err(),
        });

        result
    }

    async fn upload_tracked(&self, scope: &Scope, batch: &EncodedBatch) -> Result<(), ExportError> {
        let lifecycle = self.lifecycle.read().await;

        let transport = match (lifecycle.state, &lifecycle.transport) {
            (ClientState::Unstarted, _) => return Err(ExportError::NotStarted),
            (ClientState::Stopped, _) | (ClientState::Started, None) => {
                return Err(ExportError::Shutdown)
            }
            (ClientState::Started, Some(transport)) => Arc::clone(transport),
        };

        // A stop that timed out fires this before it gets the write lock.
        if self.shutdown.is_cancelled() {
            return Err(ExportError::Shutdown);
        }

        let timeout = (!self.config.timeout.is_zero()).then_some(self.config.timeout);
        let call_scope = Scope::merge(scope, &self.shutdown, timeout);

        let result = self
            .retrier
            .request(&call_scope, |attempt_scope| {
                let transport = Arc::clone(&transport);
                async move { send_once(transport.as_ref(), &attempt_scope, batch).await }
            })
            .await;

        drop(call_scope);
        drop(lifecycle);
        result
    }

    /// Stops the client, closing an owned transport.
    ///
    /// Waits for uploads already past their state check. If `scope` fires
    /// first, the shutdown signal is fired to unwind those uploads and the
    /// scope's error is returned once the client has stopped.
    pub async fn stop(&self, scope: &Scope) -> Result<(), ExportError> {
        let mut primary: Option<ExportError> = scope.reason().map(ExportError::cancelled);

        let mut lifecycle = {
            let write = self.lifecycle.write();
            tokio::pin!(write);
            tokio::select! {
                biased;
                guard = &mut write => guard,
                reason = scope.cancelled() => {
                    warn!(%reason, in_flight = self.in_flight(), "stop deadline reached, cancelling in-flight uploads");
                    self.shutdown.cancel_with(CancelReason::Shutdown);
                    primary = Some(ExportError::cancelled(reason));
                    write.await
                }
            }
        };

        match lifecycle.state {
            ClientState::Stopped => return Err(ExportError::AlreadyStopped),
            ClientState::Unstarted => return Err(ExportError::NotStarted),
            ClientState::Started => {}
        }

        lifecycle.state = ClientState::Stopped;
        let transport = lifecycle.transport.take();
        let owned = std::mem::take(&mut lifecycle.owned);
        self.shutdown.cancel_with(CancelReason::Shutdown);

        if let (Some(transport), true) = (transport, owned) {
            if let Err(close_err) = transport.close_boxed().await {
                // A scope expiry takes precedence over a close failure.
                primary.get_or_insert(ExportError::Transport(close_err));
            }
        }

        debug!(forced = primary.is_some(), "export client stopped");
        drop(lifecycle);

        match primary {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// One transport round-trip plus partial-success accounting.
///
/// Races the transport against the scope so a hung connection still unwinds.
async fn send_once(
    transport: &dyn TransportBoxed,
    scope: &Scope,
    batch: &EncodedBatch,
) -> Result<(), ExportError> {
    if let Some(reason) = scope.reason() {
        return Err(ExportError::cancelled(reason));
    }
    let outcome = tokio::select! {
        outcome = transport.send_boxed(scope, batch) => outcome,
        reason = scope.cancelled() => return Err(ExportError::cancelled(reason)),
    };
    account(batch.record_count, outcome.response.as_ref(), outcome.status).into_result()
}

/// Builder for [`Client`].
///
/// # Example
///
/// ```ignore
/// let client = Client::builder(ClientConfig::from_env())
///     .with_dialer(|config: &ClientConfig| GrpcTransport::connect(config))
///     .with_observer(metrics.clone())
///     .build()?;
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
    source: Option<TransportSource>,
    observer: Arc<dyn UploadObserver>,
    backoff: Backoff,
    classifier: Option<Arc<dyn RetryClassifier>>,
    waiter: Option<Arc<dyn WaiterBoxed>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            source: None,
            observer: Arc::new(NoopObserver),
            backoff: Backoff::default(),
            classifier: None,
            waiter: None,
        }
    }

    /// The client dials, owns and closes its transport.
    pub fn with_dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.source = Some(TransportSource::Dial(Arc::new(dialer)));
        self
    }

    /// Reuse an existing transport; the client never closes it.
    pub fn with_transport(mut self, transport: Arc<dyn TransportBoxed>) -> Self {
        self.source = Some(TransportSource::External(transport));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn UploadObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_waiter(mut self, waiter: Arc<dyn WaiterBoxed>) -> Self {
        self.waiter = Some(waiter);
        self
    }

    pub fn build(self) -> Result<Client, ExportError> {
        self.config.validate()?;
        let source = self.source.ok_or(ConfigError::MissingTransport)?;

        let mut retrier = Retrier::new(self.config.retry).with_backoff(self.backoff);
        if let Some(classifier) = self.classifier {
            retrier = retrier.with_classifier(classifier);
        }
        if let Some(waiter) = self.waiter {
            retrier = retrier.with_waiter(waiter);
        }

        Ok(Client {
            config: self.config,
            source,
            retrier,
            observer: self.observer,
            lifecycle: RwLock::new(Lifecycle {
                state: ClientState::Unstarted,
                transport: None,
                owned: false,
            }),
            shutdown: Scope::new(),
            in_flight: InFlightCounter::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::{StatusCode, TransportError};
    use crate::transport::{ExportResponse, NullTransport, SendOutcome, Transport};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Replays a fixed list of outcomes, then succeeds.
    struct ScriptedTransport {
        script: std::sync::Mutex<Vec<SendOutcome>>,
        sends: AtomicU32,
        closes: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(mut script: Vec<SendOutcome>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: std::sync::Mutex::new(script),
                sends: AtomicU32::new(0),
                closes: AtomicU32::new(0),
            })
        }
    }

    impl Transport for ScriptedTransport {
        async fn send(&self, _scope: &Scope, _batch: &EncodedBatch) -> SendOutcome {
            self.sends.fetch_add(1, Ordering::Relaxed);
            let next = self.script.lock().unwrap().pop();
            next.unwrap_or_else(|| SendOutcome::ok(ExportResponse::default()))
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.closes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            enabled: true,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            max_elapsed_time: Duration::from_secs(5),
        }
    }

    fn batch(n: u64) -> EncodedBatch {
        EncodedBatch::new(vec![0; n as usize], n)
    }

    #[test]
    fn test_in_flight_guard() {
        let counter = InFlightCounter::new();
        {
            let _a = counter.track(5);
            let _b = counter.track(2);
            assert_eq!(counter.get(), 7);
        }
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_build_requires_transport() {
        let err = Client::builder(ClientConfig::default()).build().unwrap_err();
        assert!(matches!(err, ExportError::Config(ConfigError::MissingTransport)));
    }

    #[tokio::test]
    async fn test_upload_before_start() {
        let client = Client::builder(ClientConfig::default())
            .with_transport(Arc::new(NullTransport))
            .build()
            .unwrap();
        let err = client.upload(&Scope::new(), &batch(1)).await.unwrap_err();
        assert!(matches!(err, ExportError::NotStarted));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let client = Client::builder(ClientConfig::default())
            .with_transport(Arc::new(NullTransport))
            .build()
            .unwrap();
        client.start(&Scope::new()).await.unwrap();
        let err = client.start(&Scope::new()).await.unwrap_err();
        assert!(matches!(err, ExportError::AlreadyStarted));
        assert_eq!(client.state().await, ClientState::Started);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let transport = ScriptedTransport::new(vec![
            SendOutcome::err(TransportError::new(StatusCode::Unavailable, "down")),
            SendOutcome::err(TransportError::new(StatusCode::Unavailable, "down")),
        ]);
        let client = Client::builder(ClientConfig::default().with_retry(fast_retry()))
            .with_transport(transport.clone())
            .build()
            .unwrap();
        client.start(&Scope::new()).await.unwrap();

        client.upload(&Scope::new(), &batch(3)).await.unwrap();
        assert_eq!(transport.sends.load(Ordering::Relaxed), 3);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_partial_success_is_returned_not_retried() {
        let transport = ScriptedTransport::new(vec![SendOutcome::ok(ExportResponse::partial(
            2,
            "invalid span",
        ))]);
        let client = Client::builder(ClientConfig::default().with_retry(fast_retry()))
            .with_transport(transport.clone())
            .build()
            .unwrap();
        client.start(&Scope::new()).await.unwrap();

        let err = client.upload(&Scope::new(), &batch(5)).await.unwrap_err();
        assert_eq!(err.partial_success().map(|p| p.rejected_count), Some(2));
        assert_eq!(transport.sends.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_external_transport_not_closed() {
        let transport = ScriptedTransport::new(vec![]);
        let client = Client::builder(ClientConfig::default())
            .with_transport(transport.clone())
            .build()
            .unwrap();
        client.start(&Scope::new()).await.unwrap();
        client.stop(&Scope::new()).await.unwrap();
        assert_eq!(transport.closes.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_dialed_transport_closed_once() {
        let closes = Arc::new(AtomicU32::new(0));
        let dialed = Arc::clone(&closes);

        struct Closing(Arc<AtomicU32>);
        impl Transport for Closing {
            async fn send(&self, _scope: &Scope, _batch: &EncodedBatch) -> SendOutcome {
                SendOutcome::ok(ExportResponse::default())
            }
            async fn close(&self) -> Result<(), TransportError> {
                self.0.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            fn name(&self) -> &str {
                "closing"
            }
        }

        let client = Client::builder(ClientConfig::default())
            .with_dialer(move |_: &ClientConfig| Ok::<_, TransportError>(Closing(Arc::clone(&dialed))))
            .build()
            .unwrap();
        client.start(&Scope::new()).await.unwrap();
        client.stop(&Scope::new()).await.unwrap();
        assert!(matches!(
            client.stop(&Scope::new()).await,
            Err(ExportError::AlreadyStopped)
        ));
        assert_eq!(closes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_close_error_surfaces() {
        struct FailingClose;
        impl Transport for FailingClose {
            async fn send(&self, _scope: &Scope, _batch: &EncodedBatch) -> SendOutcome {
                SendOutcome::ok(ExportResponse::default())
            }
            async fn close(&self) -> Result<(), TransportError> {
                Err(TransportError::new(StatusCode::Internal, "close failed"))
            }
            fn name(&self) -> &str {
                "failing-close"
            }
        }

        let client = Client::builder(ClientConfig::default())
            .with_dialer(|_: &ClientConfig| Ok::<_, TransportError>(FailingClose))
            .build()
            .unwrap();
        client.start(&Scope::new()).await.unwrap();
        let err = client.stop(&Scope::new()).await.unwrap_err();
        assert_eq!(err.transport_error().map(|t| t.code), Some(StatusCode::Internal));
        assert_eq!(client.state().await, ClientState::Stopped);
    }

    #[tokio::test]
    async fn test_dial_failure_leaves_unstarted() {
        let client = Client::builder(ClientConfig::default())
            .with_dialer(|_: &ClientConfig| {
                Err::<NullTransport, _>(TransportError::new(StatusCode::Unavailable, "no route"))
            })
            .build()
            .unwrap();
        let err = client.start(&Scope::new()).await.unwrap_err();
        assert!(err.transport_error().is_some());
        assert_eq!(client.state().await, ClientState::Unstarted);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let client = Client::builder(ClientConfig::default())
            .with_transport(Arc::new(NullTransport))
            .build()
            .unwrap();
        assert!(matches!(
            client.stop(&Scope::new()).await,
            Err(ExportError::NotStarted)
        ));
        assert_eq!(client.state().await, ClientState::Unstarted);
    }

    #[tokio::test]
    async fn test_start_after_stop() {
        let client = Client::builder(ClientConfig::default())
            .with_transport(Arc::new(NullTransport))
            .build()
            .unwrap();
        client.start(&Scope::new()).await.unwrap();
        client.stop(&Scope::new()).await.unwrap();
        assert!(matches!(
            client.start(&Scope::new()).await,
            Err(ExportError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_uploads_without_deadline() {
        let client = Client::builder(ClientConfig::default().with_timeout(Duration::MAX))
            .with_transport(Arc::new(NullTransport))
            .build()
            .unwrap();
        client.start(&Scope::new()).await.unwrap();
        client.upload(&Scope::new(), &batch(2)).await.unwrap();
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_timeout_bounds_upload() {
        let transport = ScriptedTransport::new(
            (0..1000)
                .map(|_| SendOutcome::err(TransportError::new(StatusCode::Unavailable, "down")))
                .collect(),
        );
        let retry = RetryConfig {
            enabled: true,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(1),
            max_elapsed_time: Duration::ZERO,
        };
        let client = Client::builder(
            ClientConfig::default()
                .with_retry(retry)
                .with_timeout(Duration::from_secs(5)),
        )
        .with_transport(transport)
        .build()
        .unwrap();
        client.start(&Scope::new()).await.unwrap();

        let err = client.upload(&Scope::new(), &batch(1)).await.unwrap_err();
        assert_eq!(err.cancel_reason(), Some(CancelReason::DeadlineExceeded));
    }
}
