//! Bus error types.

use thiserror::Error;
use veris_types::ErrorCode;

/// Errors from the notification bus.
///
/// Fan-out delivery never errors; a slow listener loses events by
/// contract. The only failure surface is the question/answer pattern, where
/// the caller's deadline can elapse.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The caller's deadline elapsed before an answer arrived. A late
    /// answer for the question is dropped.
    #[error("question {0} cancelled before an answer arrived")]
    Cancelled(String),
}

impl ErrorCode for BusError {
    fn code(&self) -> &'static str {
        match self {
            Self::Cancelled(_) => "BUS_CANCELLED",
        }
    }

    fn is_recoverable(&self) -> bool {
        // The caller may re-ask with a longer deadline.
        true
    }
}
