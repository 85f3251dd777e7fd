//! The bind operation sequence.
//!
//! Bind replaces the authenticated principal, which invalidates the
//! premise under which every other in-flight operation was admitted. The
//! sequence therefore takes the bind region, abandons everything pending
//! except the bind itself, and only then lets the caller verify
//! credentials and commit the new principal.

use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;

use crate::auth::Principal;
use crate::conn::{Connection, ConnectionError};
use crate::proto::MessageId;

impl Connection {
    /// Start the bind sequence for the request with id `requesting`.
    ///
    /// Blocks until any STARTTLS or other bind completes, then abandons
    /// every pending operation except the bind's own slot, checking the
    /// connection's cancellation signal between iterations. On success
    /// the returned guard keeps the bind region held; identity
    /// verification happens outside, and [`BindGuard::commit`] installs
    /// the new principal. Dropping the guard on any path releases the
    /// region.
    ///
    /// Once this returns, no operation admitted under the prior identity
    /// is still registered when the new identity takes effect.
    pub async fn begin_bind(
        &self,
        requesting: MessageId,
    ) -> Result<BindGuard<'_>, ConnectionError> {
        let region = self.acquire_bind_region().await?;

        // Region released by the guard drop if the drain aborts.
        let drained = self.pending.drain_except(requesting, &self.cancel)?;
        if drained > 0 {
            tracing::debug!(
                connection_id = %self.id,
                drained,
                "pending operations drained for bind"
            );
        }

        Ok(BindGuard {
            conn: self,
            _region: region,
        })
    }
}

/// Holds the bind region between drain and commit.
///
/// The region is released when the guard drops, whether the bind
/// succeeded, failed verification, or was abandoned by an error path.
#[must_use = "dropping the guard releases the bind region without committing"]
pub struct BindGuard<'c> {
    conn: &'c Connection,
    _region: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for BindGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindGuard")
            .field("conn", &self.conn.id())
            .finish_non_exhaustive()
    }
}

impl BindGuard<'_> {
    /// Install the verified principal and release the bind region.
    pub fn commit(self, principal: Principal) {
        tracing::info!(
            connection_id = %self.conn.id,
            principal = %principal,
            "principal replaced"
        );
        self.conn.principal.store(Arc::new(principal));
    }
}
