//! Unified error interface for veris crates.
//!
//! Every error enum in the workspace implements [`ErrorCode`]: a stable
//! machine-readable code plus a recoverability flag. Codes are
//! UPPER_SNAKE_CASE with a per-crate prefix (`BUS_`, `PSM_`, `AGENT_`,
//! `PROT_`), so the RPC layer and logs can switch on them without matching
//! on concrete enum types.
//!
//! # Example
//!
//! ```
//! use veris_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum PipeError {
//!     SendFailed(String),
//!     BadEnvelope,
//! }
//!
//! impl ErrorCode for PipeError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::SendFailed(_) => "PIPE_SEND_FAILED",
//!             Self::BadEnvelope => "PIPE_BAD_ENVELOPE",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::SendFailed(_))
//!     }
//! }
//!
//! assert_eq!(PipeError::BadEnvelope.code(), "PIPE_BAD_ENVELOPE");
//! ```

/// Stable error code interface.
///
/// # Code format
///
/// - UPPER_SNAKE_CASE, prefixed with the owning crate's domain
/// - stable once defined (changing a code is a breaking change)
///
/// # Recoverability
///
/// An error is recoverable when retrying the operation could succeed
/// (transport hiccup, timeout) or the caller can fix the condition and try
/// again. Protocol-fatal conditions are not: a closed PSM, a duplicate
/// start, a persistence failure.
pub trait ErrorCode {
    /// Returns the machine-readable code for this error.
    fn code(&self) -> &'static str;

    /// Returns whether retrying the failed operation may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that an error's code follows the veris conventions.
///
/// # Panics
///
/// Panics when the code is empty, lacks the expected prefix, or is not
/// UPPER_SNAKE_CASE.
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Asserts codes for every variant of an error enum at once.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
