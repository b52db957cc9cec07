//! Partial-success accounting.
//!
//! A collector may accept a batch while rejecting some of its records. The
//! functions here turn the transport's view of one attempt into a success
//! count and an error value; they hold no state and do not record metrics.

use crate::error::{ExportError, TransportError};
use crate::transport::ExportResponse;
use thiserror::Error;

/// The collector's report that part of a batch was rejected.
///
/// The count is kept exactly as the server sent it; clamping happens only
/// when a success count is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("OTLP partial success: {} ({rejected_count} spans rejected)", display_message(.message))]
pub struct PartialSuccess {
    pub rejected_count: i64,
    pub message: String,
}

fn display_message(message: &str) -> &str {
    if message.is_empty() {
        "empty message"
    } else {
        message
    }
}

impl PartialSuccess {
    pub fn new(rejected_count: i64, message: impl Into<String>) -> Self {
        Self {
            rejected_count,
            message: message.into(),
        }
    }

    /// Returns `true` if the envelope actually reports something.
    ///
    /// Collectors may send an envelope with zero rejections and no message;
    /// that is a full success.
    pub fn is_reportable(&self) -> bool {
        self.rejected_count != 0 || !self.message.is_empty()
    }

    /// The rejected count clamped into `[0, submitted]`.
    pub fn clamped_rejected(&self, submitted: u64) -> u64 {
        clamp_rejected(self.rejected_count, submitted)
    }
}

/// Clamps a server-reported rejection count into `[0, submitted]`.
pub fn clamp_rejected(rejected: i64, submitted: u64) -> u64 {
    if rejected <= 0 {
        0
    } else {
        (rejected as u64).min(submitted)
    }
}

/// Outcome of accounting for one transport attempt.
#[derive(Debug, Clone)]
pub struct Accounting {
    pub submitted: u64,
    pub succeeded: u64,
    pub error: Option<ExportError>,
}

impl Accounting {
    pub fn into_result(self) -> Result<(), ExportError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Accounts for a single attempt.
///
/// `status` is the transport's own result; `response` is whatever the
/// collector sent back, which may exist even when `status` is an error. The
/// resulting error, if any, joins the transport error with the
/// partial-success marker so both remain queryable.
pub fn account(
    submitted: u64,
    response: Option<&ExportResponse>,
    status: Result<(), TransportError>,
) -> Accounting {
    let partial = response
        .and_then(|r| r.partial_success.as_ref())
        .filter(|p| p.is_reportable())
        .cloned();

    let transport_err = status.err().map(ExportError::from);
    let error = ExportError::join(transport_err, partial.map(ExportError::from));
    let succeeded = succeeded_count(submitted, error.as_ref());

    Accounting {
        submitted,
        succeeded,
        error,
    }
}

/// Number of records that ultimately succeeded given a terminal error.
///
/// With no error every record succeeded. An error carrying a partial-success
/// marker (possibly joined or retry-wrapped) loses only the rejected records;
/// any other error loses the whole batch. A rejected count above `submitted`
/// clamps to `submitted`, so nothing succeeded.
pub fn succeeded_count(submitted: u64, error: Option<&ExportError>) -> u64 {
    match error {
        None => submitted,
        Some(err) => match err.partial_success() {
            Some(partial) => submitted - partial.clamped_rejected(submitted),
            None => 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use proptest::prelude::*;

    fn response(rejected: i64, message: &str) -> ExportResponse {
        ExportResponse {
            partial_success: Some(PartialSuccess::new(rejected, message)),
        }
    }

    #[test]
    fn test_negative_rejected_clamps_to_zero() {
        let acc = account(10, Some(&response(-5, "")), Ok(()));
        assert_eq!(acc.succeeded, 10);
        // Still reported: the server did send a nonzero count.
        assert!(acc.error.as_ref().is_some_and(ExportError::is_partial_success));
    }

    #[test]
    fn test_excess_rejected_clamps_to_submitted() {
        let acc = account(10, Some(&response(15, "quota")), Ok(()));
        assert_eq!(acc.succeeded, 0);
        let partial = acc.error.as_ref().and_then(ExportError::partial_success).unwrap();
        assert_eq!(partial.rejected_count, 15);
    }

    #[test]
    fn test_empty_envelope_is_success() {
        let acc = account(10, Some(&response(0, "")), Ok(()));
        assert_eq!(acc.succeeded, 10);
        assert!(acc.error.is_none());
        assert!(acc.into_result().is_ok());
    }

    #[test]
    fn test_message_only_is_reported() {
        let acc = account(4, Some(&response(0, "dropped attributes")), Ok(()));
        assert_eq!(acc.succeeded, 4);
        let err = acc.error.unwrap();
        assert_eq!(
            err.to_string(),
            "OTLP partial success: dropped attributes (0 spans rejected)"
        );
    }

    #[test]
    fn test_transport_error_with_partial_joins() {
        let status = Err(TransportError::new(StatusCode::Unavailable, "try later"));
        let acc = account(10, Some(&response(4, "")), status);
        assert_eq!(acc.succeeded, 6);
        let err = acc.error.unwrap();
        assert!(err.is_partial_success());
        assert_eq!(err.transport_error().map(|t| t.code), Some(StatusCode::Unavailable));
        assert!(err.to_string().contains("empty message"));
    }

    #[test]
    fn test_transport_error_alone_loses_batch() {
        let status = Err(TransportError::new(StatusCode::Internal, "boom"));
        let acc = account(7, None, status);
        assert_eq!(acc.succeeded, 0);
        assert!(matches!(acc.error, Some(ExportError::Transport(_))));
    }

    #[test]
    fn test_succeeded_sees_through_retry_wrapper() {
        let err = ExportError::RetryElapsed {
            source: Box::new(PartialSuccess::new(2, "").into()),
        };
        assert_eq!(succeeded_count(5, Some(&err)), 3);
    }

    proptest! {
        #[test]
        fn prop_success_count_in_range(rejected in any::<i64>(), submitted in 0u64..1_000_000) {
            let acc = account(submitted, Some(&response(rejected, "")), Ok(()));
            prop_assert!(acc.succeeded <= submitted);
            let expected = if rejected <= 0 {
                submitted
            } else {
                submitted.saturating_sub(rejected as u64)
            };
            prop_assert_eq!(acc.succeeded, expected);
        }
    }
}
