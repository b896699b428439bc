//! Protocol error types and completion error codes.

use std::fmt;
use thiserror::Error;

/// Errors raised while encoding or parsing wire data.
///
/// Parse failures abort only the current parse operation: every decode step
/// returns a `Result` and short-circuits on the first failure, leaving the
/// read cursor where it was before the failed field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error(
        "buffer underflow at {offset}: expected {wanted} bytes > {remaining} remaining bytes ({})",
        .mitigation.unwrap_or(DEFAULT_MITIGATION)
    )]
    Underflow {
        /// Read cursor position when the shortfall was detected.
        offset: usize,
        /// Number of bytes the field required.
        wanted: usize,
        /// Number of bytes that were actually available.
        remaining: usize,
        /// Hint for the user as to why the underflow might have occurred,
        /// which depends on the request type.
        mitigation: Option<&'static str>,
    },

    #[error("parse failure at {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("invalid UTF-8 in string at {offset}")]
    InvalidUtf8 { offset: usize },
}

/// Fallback mitigation hint when the buffer carries none.
pub const DEFAULT_MITIGATION: &str = "incorrect broker.version.fallback?";

/// Stable error codes surfaced to response callbacks.
///
/// These codes are part of the completion contract: every queued buffer that
/// is purged, timed out, or completed observes exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    /// Successful completion.
    #[default]
    NoError,
    /// Structurally invalid response content.
    BadMessage,
    /// Fewer bytes remained than a field required.
    Underflow,
    /// Deadline passed before a response arrived.
    Timeout,
    /// Transport-reported failure, passed through opaquely.
    Transport,
    /// System teardown sentinel. Callbacks receiving it must perform only
    /// minimal, allocation-free cleanup and must not assume they execute on
    /// their originating thread.
    Destroy,
    /// Buffer was purged from its queue by policy.
    Purged,
    /// The reply destination's version stamp is older than the connection's
    /// current version; the delivery is degenerate, not a completion.
    Outdated,
}

impl ErrorCode {
    /// Returns whether a request failing with this code is potentially
    /// retryable. The final decision belongs to the response callback.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::Transport | ErrorCode::Timeout)
    }

    /// Returns whether this code signals entity teardown rather than a
    /// request-level failure.
    pub fn is_destroy(&self) -> bool {
        matches!(self, ErrorCode::Destroy)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NoError => write!(f, "NO_ERROR"),
            ErrorCode::BadMessage => write!(f, "BAD_MESSAGE"),
            ErrorCode::Underflow => write!(f, "UNDERFLOW"),
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::Transport => write!(f, "TRANSPORT"),
            ErrorCode::Destroy => write!(f, "DESTROY"),
            ErrorCode::Purged => write!(f, "PURGED"),
            ErrorCode::Outdated => write!(f, "OUTDATED"),
        }
    }
}

impl From<&ProtocolError> for ErrorCode {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::Underflow { .. } => ErrorCode::Underflow,
            ProtocolError::Parse { .. } | ProtocolError::InvalidUtf8 { .. } => {
                ErrorCode::BadMessage
            }
        }
    }
}
