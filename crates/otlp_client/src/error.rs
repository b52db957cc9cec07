//! Error types for the export client.
//!
//! Every failure a caller can see is a variant of [`ExportError`]. Wrapped
//! causes are kept as typed values rather than flattened into strings, so
//! callers can ask "is this a transport error?" or "did the collector
//! partially reject the batch?" of any error returned by the client, including
//! joined and retry-wrapped ones.

use crate::config::ConfigError;
use crate::partial::PartialSuccess;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// RPC status codes reported by the transport.
///
/// Mirrors the canonical gRPC status code set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    /// Returns the status name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed transport round-trip.
///
/// `retry_delay` carries server-supplied retry metadata (for example a
/// `RetryInfo` detail on a rate-limit response).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: StatusCode,
    pub message: String,
    pub retry_delay: Option<Duration>,
}

impl TransportError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_delay: None,
        }
    }

    /// Attaches server retry metadata to the status.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }
}

/// Why a scope stopped an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The scope was cancelled explicitly.
    Cancelled,
    /// The scope's deadline passed.
    DeadlineExceeded,
    /// The client's shutdown signal fired.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("operation cancelled"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
            Self::Shutdown => f.write_str("client shutting down"),
        }
    }
}

/// Errors returned by the export client.
#[derive(Debug, Clone, Error)]
pub enum ExportError {
    /// A single transport attempt failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The collector accepted only part of the batch.
    #[error(transparent)]
    PartialSuccess(#[from] PartialSuccess),

    /// Several errors observed on the same attempt.
    #[error("{}", join_display(.0))]
    Joined(Vec<ExportError>),

    /// Waiting for the next attempt would overrun the retry budget.
    #[error("max retry time would elapse: {source}")]
    RetryWouldElapse {
        #[source]
        source: Box<ExportError>,
    },

    /// The retry budget ran out while waiting.
    #[error("max retry time elapsed: {source}")]
    RetryElapsed {
        #[source]
        source: Box<ExportError>,
    },

    /// The governing scope fired, optionally while a failure was pending.
    #[error("{reason}{}", .source.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    Cancelled {
        reason: CancelReason,
        #[source]
        source: Option<Box<ExportError>>,
    },

    /// Upload or Stop before Start.
    #[error("client not started")]
    NotStarted,

    /// Start on a client that is already running.
    #[error("client already started")]
    AlreadyStarted,

    /// Stop on a client that is already stopped.
    #[error("client already stopped")]
    AlreadyStopped,

    /// The client has been, or is being, shut down.
    #[error("client is shutdown")]
    Shutdown,

    /// The client could not be built from its configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Span records could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),
}

fn join_display(errors: &[ExportError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ExportError {
    /// Wraps a cancellation reason with no pending cause.
    pub fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled {
            reason,
            source: None,
        }
    }

    /// Joins two optional errors.
    ///
    /// Nested joins are flattened; joining a single error yields it unchanged.
    pub fn join(first: Option<ExportError>, second: Option<ExportError>) -> Option<ExportError> {
        let mut members = Vec::new();
        for err in [first, second].into_iter().flatten() {
            match err {
                Self::Joined(inner) => members.extend(inner),
                other => members.push(other),
            }
        }
        match members.len() {
            0 => None,
            1 => members.pop(),
            _ => Some(Self::Joined(members)),
        }
    }

    /// Depth-first search over this error, its joined members and wrapped causes.
    fn find<'a, T: ?Sized>(&'a self, pick: &impl Fn(&'a ExportError) -> Option<&'a T>) -> Option<&'a T> {
        if let Some(found) = pick(self) {
            return Some(found);
        }
        match self {
            Self::Joined(members) => members.iter().find_map(|e| e.find(pick)),
            Self::RetryWouldElapse { source } | Self::RetryElapsed { source } => source.find(pick),
            Self::Cancelled {
                source: Some(source),
                ..
            } => source.find(pick),
            _ => None,
        }
    }

    /// Returns the transport status carried anywhere in this error.
    pub fn transport_error(&self) -> Option<&TransportError> {
        self.find(&|e| match e {
            Self::Transport(t) => Some(t),
            _ => None,
        })
    }

    /// Returns the partial-success marker carried anywhere in this error.
    pub fn partial_success(&self) -> Option<&PartialSuccess> {
        self.find(&|e| match e {
            Self::PartialSuccess(p) => Some(p),
            _ => None,
        })
    }

    /// Returns `true` if the collector partially rejected the batch.
    pub fn is_partial_success(&self) -> bool {
        self.partial_success().is_some()
    }

    /// Returns `true` if the retry budget ran out (before or after the final wait).
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryWouldElapse { .. } | Self::RetryElapsed { .. })
    }

    /// Returns the cancellation reason if this is a cancellation.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::Cancelled { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Returns `true` for the lifecycle-state errors.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::NotStarted | Self::AlreadyStarted | Self::AlreadyStopped | Self::Shutdown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn unavailable() -> ExportError {
        TransportError::new(StatusCode::Unavailable, "connection refused").into()
    }

    #[test]
    fn test_join_is_both() {
        let partial = PartialSuccess::new(3, "too old");
        let joined = ExportError::join(Some(unavailable()), Some(partial.clone().into())).unwrap();

        assert_eq!(
            joined.transport_error().map(|t| t.code),
            Some(StatusCode::Unavailable)
        );
        assert_eq!(joined.partial_success(), Some(&partial));
    }

    #[test]
    fn test_join_single_is_unchanged() {
        let joined = ExportError::join(None, Some(unavailable())).unwrap();
        assert!(matches!(joined, ExportError::Transport(_)));
        assert!(ExportError::join(None, None).is_none());
    }

    #[test]
    fn test_join_flattens() {
        let inner = ExportError::join(Some(unavailable()), Some(unavailable())).unwrap();
        let outer =
            ExportError::join(Some(inner), Some(PartialSuccess::new(1, "").into())).unwrap();
        match outer {
            ExportError::Joined(members) => assert_eq!(members.len(), 3),
            other => panic!("expected joined error, got {other:?}"),
        }
    }

    #[test]
    fn test_queries_see_through_retry_wrappers() {
        let err = ExportError::RetryElapsed {
            source: Box::new(unavailable()),
        };
        assert!(err.is_retry_exhausted());
        assert!(err.transport_error().is_some());
        assert!(err.to_string().starts_with("max retry time elapsed"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_cancelled_display() {
        let bare = ExportError::cancelled(CancelReason::DeadlineExceeded);
        assert_eq!(bare.to_string(), "deadline exceeded");

        let wrapped = ExportError::Cancelled {
            reason: CancelReason::Shutdown,
            source: Some(Box::new(unavailable())),
        };
        assert_eq!(
            wrapped.to_string(),
            "client shutting down: UNAVAILABLE: connection refused"
        );
        assert_eq!(wrapped.cancel_reason(), Some(CancelReason::Shutdown));
        assert!(wrapped.transport_error().is_some());
    }

    #[test]
    fn test_lifecycle_errors() {
        assert!(ExportError::NotStarted.is_lifecycle());
        assert!(ExportError::Shutdown.is_lifecycle());
        assert!(!unavailable().is_lifecycle());
    }
}
