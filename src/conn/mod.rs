//! Connection state machine and synchronization discipline.
//!
//! # Data Flow
//! ```text
//! Decoded request (codec layer)
//!     → try_admit: bind region held briefly, slot inserted
//!     → handler task runs with the slot's cancellation token
//!     → remove on completion / abandon on request / clear on teardown
//!
//! Administrative operations:
//!     bind     → bind region + drain      (bind.rs)
//!     STARTTLS → bind region + transport swap (upgrade.rs)
//! ```
//!
//! # Design Decisions
//! - Three independent exclusive regions: write (outbound bytes), bind
//!   (identity and transport changes), read gate (plaintext read pacing)
//! - Every region acquisition races the connection's cancellation token
//!   and fails with a cancellation error instead of hanging
//! - The principal is an atomically swapped snapshot; handlers load it
//!   once at operation start and never observe a torn value
//! - Cancellation is cooperative throughout; close() cancels the token
//!   tree and in-flight waits unwind on their own

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::auth::Principal;
use crate::net::transport::{Io, Transport};
use crate::proto::MessageId;

pub mod bind;
pub mod error;
pub mod registry;
pub mod slot;
pub mod upgrade;

pub use bind::BindGuard;
pub use error::{ConnectionError, StartTlsError};
pub use registry::PendingRegistry;
pub use slot::RequestSlot;
pub use upgrade::TlsUpgrade;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// How much buffer capacity to ensure before each transport read.
const READ_CHUNK: usize = 8 * 1024;

/// Process-unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One accepted directory session.
///
/// Owns the transport, the pending-operation registry, the cancellation
/// tree, and the three exclusive regions that keep reads, writes, and
/// administrative state changes from interleaving unsafely.
pub struct Connection {
    id: ConnectionId,
    /// Root of this connection's cancellation tree.
    cancel: CancellationToken,
    /// Latch so close() signals exactly once.
    closed: AtomicBool,

    /// Inbound half of the transport. Replaced wholesale by STARTTLS.
    read_half: Mutex<Option<ReadHalf<Transport>>>,
    /// Outbound half; this mutex IS the write region.
    write_half: Mutex<Option<WriteHalf<Transport>>>,

    /// Bind region: serializes binds, STARTTLS, and slot admission.
    /// Arc so owned guards can be held across the upgrade phases.
    bind_region: Arc<Mutex<()>>,
    /// Read gate: at most one plaintext read in flight, continuation
    /// driven by whoever consumed the previous read's bytes.
    read_gate: Semaphore,
    read_gate_held: AtomicBool,

    /// Set once the security handshake completes.
    secured: AtomicBool,
    /// Current authenticated principal, swapped under the bind region.
    principal: ArcSwap<Principal>,
    /// Operations admitted and not yet completed.
    pending: PendingRegistry,
}

impl Connection {
    /// Wrap a freshly accepted stream into a connection.
    ///
    /// The connection starts plaintext, anonymous, with an empty pending
    /// registry.
    pub fn new(stream: impl Io + 'static) -> Self {
        let (read_half, write_half) = tokio::io::split(Transport::plain(stream));
        Self {
            id: ConnectionId::new(),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            read_half: Mutex::new(Some(read_half)),
            write_half: Mutex::new(Some(write_half)),
            bind_region: Arc::new(Mutex::new(())),
            read_gate: Semaphore::new(1),
            read_gate_held: AtomicBool::new(false),
            secured: AtomicBool::new(false),
            principal: ArcSwap::from_pointee(Principal::anonymous()),
            pending: PendingRegistry::new(),
        }
    }

    /// This connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Snapshot of the current principal.
    ///
    /// Handlers load this once at operation start; re-fetching mid
    /// operation can observe a principal installed by a concurrent bind.
    pub fn principal(&self) -> Arc<Principal> {
        self.principal.load_full()
    }

    /// Whether the security handshake has completed.
    pub fn is_secured(&self) -> bool {
        self.secured.load(Ordering::Acquire)
    }

    /// Whether close() has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The connection's cancellation token. Slot tokens are children of
    /// this one.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Number of currently pending operations.
    pub fn pending_operations(&self) -> usize {
        self.pending.len()
    }

    /// Try to admit a new operation under the given correlation number.
    ///
    /// Briefly holds the bind region around the insertion, so admission
    /// cannot slip between a bind's drain and its completion. Returns the
    /// slot's cancellation token, `None` on a duplicate correlation
    /// number, or [`ConnectionError::Cancelled`] when the connection is
    /// closing.
    pub async fn try_admit(
        &self,
        id: MessageId,
    ) -> Result<Option<CancellationToken>, ConnectionError> {
        let _region = self.acquire_bind_region().await?;
        Ok(self.pending.admit(id, &self.cancel))
    }

    /// Remove a completed operation. Idempotent.
    pub fn remove(&self, id: MessageId) {
        self.pending.remove(id);
    }

    /// Cancel and remove one pending operation. An absent id is a no-op.
    pub fn abandon(&self, id: MessageId) -> bool {
        let hit = self.pending.abandon(id);
        if hit {
            tracing::debug!(connection_id = %self.id, message_id = %id, "operation abandoned");
        }
        hit
    }

    /// Read more inbound bytes into `buf`, honoring the read discipline.
    ///
    /// Before the transport is secured, each read first acquires the read
    /// gate; the gate is only reopened by [`resume_reading`] once the
    /// consumer has taken the decoded frames. After the upgrade the gate
    /// is bypassed. Returns the number of bytes read; 0 means the peer
    /// closed the transport.
    ///
    /// [`resume_reading`]: Connection::resume_reading
    pub async fn read_frame(&self, buf: &mut BytesMut) -> Result<usize, ConnectionError> {
        if !self.is_secured() {
            self.acquire_read_gate().await?;
        }

        let mut guard = self.lock_read_half().await?;
        let half = guard.as_mut().ok_or(ConnectionError::TransportReleased)?;

        buf.reserve(READ_CHUNK);
        tokio::select! {
            read = half.read_buf(buf) => Ok(read?),
            _ = self.cancel.cancelled() => Err(ConnectionError::Cancelled),
        }
    }

    /// Reopen the read gate for the next plaintext read.
    ///
    /// Safe no-op when the gate is not held or the transport has been
    /// secured in the meantime.
    pub fn resume_reading(&self) {
        if self.is_secured() {
            return;
        }
        if self
            .read_gate_held
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.read_gate.add_permits(1);
        }
    }

    /// Write one encoded frame, serialized against all other writers.
    ///
    /// The write region is held for the whole frame, so concurrent
    /// handler responses never interleave mid-frame. Fails with a
    /// cancellation error when the connection is closing.
    pub async fn write_frame(&self, frame: &[u8]) -> Result<(), ConnectionError> {
        let mut guard = self.lock_write_half().await?;
        let half = guard.as_mut().ok_or(ConnectionError::TransportReleased)?;

        tokio::select! {
            written = async {
                half.write_all(frame).await?;
                half.flush().await
            } => written.map_err(ConnectionError::Io),
            _ = self.cancel.cancelled() => Err(ConnectionError::Cancelled),
        }
    }

    /// Signal connection-wide cancellation. Idempotent.
    ///
    /// Cancels every pending slot's derived token, unblocks region
    /// acquisitions, and makes in-flight I/O fail with a cancellation
    /// error. Termination of handlers is cooperative; nothing is severed
    /// mid-instruction.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(
            connection_id = %self.id,
            pending = self.pending.len(),
            "closing connection"
        );
        self.cancel.cancel();
    }

    /// Release the connection's resources.
    ///
    /// Ensures close() ran, sweeps the registry, and drops both transport
    /// halves. Safe to call after close() and safe to call twice; never
    /// fails on already-released resources.
    pub async fn dispose(&self) {
        self.close();
        let swept = self.pending.clear();
        if swept > 0 {
            tracing::debug!(connection_id = %self.id, swept, "pending operations swept");
        }
        // In-flight I/O has been cancelled above, so these locks free up.
        *self.read_half.lock().await = None;
        *self.write_half.lock().await = None;
        tracing::trace!(connection_id = %self.id, "connection disposed");
    }

    /// Acquire the bind region, racing the cancellation token.
    ///
    /// The post-acquisition check covers the select racing both branches
    /// being ready at once.
    pub(crate) async fn acquire_bind_region(
        &self,
    ) -> Result<OwnedMutexGuard<()>, ConnectionError> {
        let guard = tokio::select! {
            guard = Arc::clone(&self.bind_region).lock_owned() => guard,
            _ = self.cancel.cancelled() => return Err(ConnectionError::Cancelled),
        };
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Cancelled);
        }
        Ok(guard)
    }

    pub(crate) async fn lock_read_half(
        &self,
    ) -> Result<MutexGuard<'_, Option<ReadHalf<Transport>>>, ConnectionError> {
        tokio::select! {
            guard = self.read_half.lock() => Ok(guard),
            _ = self.cancel.cancelled() => Err(ConnectionError::Cancelled),
        }
    }

    pub(crate) async fn lock_write_half(
        &self,
    ) -> Result<MutexGuard<'_, Option<WriteHalf<Transport>>>, ConnectionError> {
        tokio::select! {
            guard = self.write_half.lock() => Ok(guard),
            _ = self.cancel.cancelled() => Err(ConnectionError::Cancelled),
        }
    }

    async fn acquire_read_gate(&self) -> Result<(), ConnectionError> {
        tokio::select! {
            permit = self.read_gate.acquire() => {
                let permit = permit.map_err(|_| ConnectionError::Cancelled)?;
                permit.forget();
                self.read_gate_held.store(true, Ordering::SeqCst);
                Ok(())
            }
            _ = self.cancel.cancelled() => Err(ConnectionError::Cancelled),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("secured", &self.is_secured())
            .field("closed", &self.is_closed())
            .field("pending", &self.pending.len())
            .finish()
    }
}
