//! Error types for SMTP delivery operations.

use std::io;

use crate::types::Reply;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP delivery error types.
///
/// Connection-level failures (`Io`, `Tls`, `ConnectTimeout`,
/// `ResponseTimeout`, `Closed`) poison the session that produced them:
/// every outstanding and subsequent operation on that session reports a
/// connection failure. The remaining variants are either remote rejections
/// of a negotiated step or local policy decisions made before any bytes
/// are sent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error during handshake or record processing.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Connection could not be established within the configured timeout.
    #[error("connection attempt timed out")]
    ConnectTimeout,

    /// No reply arrived for the oldest outstanding command in time.
    #[error("timed out waiting for a server reply")]
    ResponseTimeout,

    /// Session is closed; the string carries the original failure.
    #[error("session closed: {0}")]
    Closed(String),

    /// Greeting or capability listing rejected by the remote.
    #[error("negotiation rejected with {}", .reply.code)]
    Negotiation {
        /// The rejecting reply.
        reply: Reply,
    },

    /// A required extension is absent from the advertised capability set.
    ///
    /// Detected locally; zero bytes are sent for the affected step.
    #[error("server does not support {extension}")]
    Unsupported {
        /// Name of the missing extension.
        extension: String,
    },

    /// Credential exchange rejected by the remote.
    #[error("authentication rejected with {}", .reply.code)]
    Authentication {
        /// The rejecting reply.
        reply: Reply,
    },

    /// Envelope (sender) command refused before any recipient was attempted.
    #[error("envelope rejected with {}", .reply.code)]
    EnvelopeRejected {
        /// The rejecting reply.
        reply: Reply,
    },

    /// Protocol violation (malformed or unexpected response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    /// A transaction was constructed without recipients.
    #[error("transaction has no recipients")]
    EmptyRecipients,
}

impl Error {
    /// Creates an unsupported-extension error.
    #[must_use]
    pub fn unsupported(extension: impl Into<String>) -> Self {
        Self::Unsupported {
            extension: extension.into(),
        }
    }

    /// Returns true if this is a transport-level connection failure.
    #[must_use]
    pub const fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Tls(_)
                | Self::ConnectTimeout
                | Self::ResponseTimeout
                | Self::Closed(_)
        )
    }

    /// Returns the reply code carried by a remote rejection, if any.
    #[must_use]
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            Self::Negotiation { reply }
            | Self::Authentication { reply }
            | Self::EnvelopeRejected { reply } => Some(reply.code.as_u16()),
            _ => None,
        }
    }

    /// Produces an equivalent error for reporting one failure to several
    /// delivery futures.
    ///
    /// `Io` and `Tls` carry non-cloneable sources, so those collapse into
    /// `Closed` with the original description.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Io(_) | Self::Tls(_) => Self::Closed(self.to_string()),
            Self::ConnectTimeout => Self::ConnectTimeout,
            Self::ResponseTimeout => Self::ResponseTimeout,
            Self::Closed(reason) => Self::Closed(reason.clone()),
            Self::Negotiation { reply } => Self::Negotiation {
                reply: reply.clone(),
            },
            Self::Unsupported { extension } => Self::Unsupported {
                extension: extension.clone(),
            },
            Self::Authentication { reply } => Self::Authentication {
                reply: reply.clone(),
            },
            Self::EnvelopeRejected { reply } => Self::EnvelopeRejected {
                reply: reply.clone(),
            },
            Self::Protocol(msg) => Self::Protocol(msg.clone()),
            Self::InvalidAddress(addr) => Self::InvalidAddress(addr.clone()),
            Self::EmptyRecipients => Self::EmptyRecipients,
        }
    }
}
