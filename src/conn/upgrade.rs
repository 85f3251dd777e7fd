//! The STARTTLS transport upgrade sequence.
//!
//! Upgrading while other operations are mid-flight is unsafe: bytes read
//! under the old transport could be replayed or misattributed under the
//! new one. The sequence is therefore two-phase. `begin` checks
//! eligibility and takes the bind region; `perform` runs the handshake
//! and swaps the transport. The region is released when the
//! [`TlsUpgrade`] value drops, on the success and failure paths alike.

use tokio::sync::OwnedMutexGuard;
use tokio_rustls::TlsAcceptor;

use crate::conn::{Connection, ConnectionError, StartTlsError};
use crate::net::transport::Transport;
use crate::proto::MessageId;

impl Connection {
    /// Check STARTTLS eligibility and take the bind region.
    ///
    /// Fails without acquiring anything when the transport is already
    /// secured. Otherwise acquires the bind region and re-checks: if any
    /// operation other than `requesting` is pending, the region is
    /// released and the attempt reported ineligible. On success the
    /// caller sends its plaintext acceptance and then calls
    /// [`TlsUpgrade::perform`].
    pub async fn begin_tls_upgrade(
        &self,
        requesting: MessageId,
    ) -> Result<TlsUpgrade<'_>, StartTlsError> {
        if self.is_secured() {
            return Err(StartTlsError::AlreadySecured);
        }

        let region = self.acquire_bind_region().await?;

        // Re-check under the region: another upgrade may have won the race.
        if self.is_secured() {
            return Err(StartTlsError::AlreadySecured);
        }
        if self.pending.others_pending(requesting) {
            return Err(StartTlsError::OperationsPending);
        }

        Ok(TlsUpgrade {
            conn: self,
            _region: region,
        })
    }
}

/// An eligible, in-progress transport upgrade.
///
/// Holds the bind region from `begin` until drop, so no bind or second
/// upgrade can start while the handshake runs.
#[must_use = "dropping the upgrade releases the bind region without securing the transport"]
pub struct TlsUpgrade<'c> {
    conn: &'c Connection,
    _region: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for TlsUpgrade<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsUpgrade")
            .field("conn", &self.conn.id())
            .finish_non_exhaustive()
    }
}

impl TlsUpgrade<'_> {
    /// Run the security handshake and swap the transport.
    ///
    /// Takes exclusive hold of both transport halves, reunites them, and
    /// hands the stream to the acceptor, racing the connection's
    /// cancellation signal. On success the secured transport is swapped
    /// in atomically and the secured flag set. On failure the transport
    /// is left released (its state is indeterminate) and the caller
    /// should tear the connection down.
    pub async fn perform(self, acceptor: &TlsAcceptor) -> Result<(), ConnectionError> {
        let conn = self.conn;

        let mut read_guard = conn.lock_read_half().await?;
        let mut write_guard = conn.lock_write_half().await?;

        let read = read_guard.take().ok_or(ConnectionError::TransportReleased)?;
        let write = match write_guard.take() {
            Some(write) => write,
            None => {
                *read_guard = Some(read);
                return Err(ConnectionError::TransportReleased);
            }
        };

        let stream = match read.unsplit(write) {
            Transport::Plain(stream) => stream,
            secured @ Transport::Tls(_) => {
                // begin() refused secured transports; restore and bail.
                let (read, write) = tokio::io::split(secured);
                *read_guard = Some(read);
                *write_guard = Some(write);
                return Err(ConnectionError::TransportReleased);
            }
        };

        let secured = tokio::select! {
            handshake = acceptor.accept(stream) => {
                handshake.map_err(ConnectionError::Handshake)?
            }
            _ = conn.cancel.cancelled() => return Err(ConnectionError::Cancelled),
        };

        let (read, write) = tokio::io::split(Transport::Tls(Box::new(secured)));
        *read_guard = Some(read);
        *write_guard = Some(write);
        conn.secured.store(true, std::sync::atomic::Ordering::Release);

        tracing::info!(connection_id = %conn.id, "transport secured");
        Ok(())
        // Bind region released here, success or not, as `self` drops.
    }
}
