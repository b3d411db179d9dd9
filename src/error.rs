//! Error types for ESL operations

use thiserror::Error;

/// Result alias used throughout the crate.
pub type EslResult<T> = Result<T, EslError>;

/// Errors surfaced by the ESL session and transport.
///
/// Command failures (`-ERR` replies) are normal telephony control flow and
/// are always returned as error values, never panics.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EslError {
    /// Underlying TCP I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation did not complete within its timeout.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that expired, in milliseconds.
        timeout_ms: u64,
    },

    /// The peer closed the connection, or the reader task exited.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation requires a live transport and none is held.
    #[error("not connected")]
    NotConnected,

    /// `connect()` called while a live transport is already held.
    #[error("already connected")]
    AlreadyConnected,

    /// The switch rejected authentication.
    #[error("authentication failed: {message}")]
    AuthFailed {
        /// Reply text from the switch, if any.
        message: String,
    },

    /// The byte stream violated ESL framing.
    #[error("protocol error: {message}")]
    ProtocolError {
        /// What went wrong.
        message: String,
    },

    /// A header line could not be parsed.
    #[error("invalid header line: {header}")]
    InvalidHeader {
        /// The offending line.
        header: String,
    },

    /// The switch answered a command with a failure marker.
    #[error("{command} failed: {reply_text}")]
    CommandFailed {
        /// The operation that was attempted.
        command: String,
        /// Raw response text from the switch.
        reply_text: String,
    },

    /// The reply matched neither `+OK` nor `-ERR`.
    #[error("unexpected reply: {reply_text}")]
    UnexpectedReply {
        /// Raw reply text.
        reply_text: String,
    },

    /// Caller-supplied input was rejected before anything was sent.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Why the input was rejected.
        message: String,
    },

    /// A JSON response body could not be decoded.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EslError {
    pub(crate) fn protocol_error(message: impl Into<String>) -> Self {
        EslError::ProtocolError {
            message: message.into(),
        }
    }

    pub(crate) fn auth_failed(message: impl Into<String>) -> Self {
        EslError::AuthFailed {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        EslError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn command_failed(command: impl Into<String>, reply_text: impl Into<String>) -> Self {
        EslError::CommandFailed {
            command: command.into(),
            reply_text: reply_text.into(),
        }
    }
}
