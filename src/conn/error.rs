//! Connection error taxonomy.

use thiserror::Error;

/// Errors surfaced by connection operations.
///
/// Cancellation is an ordinary variant, not a panic: a handler receiving
/// it owes no response and must simply stop. I/O and handshake failures
/// propagate to the caller of the affected operation and are never
/// swallowed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A cancellable wait observed the connection's cancellation signal.
    #[error("operation cancelled, connection is closing")]
    Cancelled,

    /// The transport has been released (disposed, or left indeterminate by
    /// a failed security handshake).
    #[error("transport released")]
    TransportReleased,

    /// Transport I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The security handshake failed; the transport is no longer
    /// trustworthy and the connection should be torn down.
    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),
}

impl ConnectionError {
    /// Whether this error is the cooperative-cancellation signal rather
    /// than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConnectionError::Cancelled)
    }
}

/// Rejections of a STARTTLS attempt.
///
/// Eligibility rejections leave the connection fully usable; only the
/// wrapped connection errors are fatal.
#[derive(Debug, Error)]
pub enum StartTlsError {
    /// The transport is already secured.
    #[error("transport is already secured")]
    AlreadySecured,

    /// Operations other than the requesting one are still pending.
    #[error("other operations are pending")]
    OperationsPending,

    /// The underlying connection failed or is closing.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
