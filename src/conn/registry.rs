//! Pending-operation registry.
//!
//! # Responsibilities
//! - Map correlation numbers to their request slots
//! - Reject duplicate correlation numbers at admission
//! - Cancel and remove slots on abandon, drain, and shutdown
//!
//! # Design Decisions
//! - Insert/remove run concurrently from handler tasks; the coarser
//!   exclusivity around admission and drains comes from the connection's
//!   bind region, not from the map's internal locking
//! - Removal and abandonment are idempotent; a slot vanishing mid-drain
//!   is not an error

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::conn::error::ConnectionError;
use crate::conn::slot::RequestSlot;
use crate::proto::MessageId;

/// Concurrent registry of the operations pending on one connection.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    slots: DashMap<MessageId, RequestSlot>,
}

impl PendingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Try to admit a new operation.
    ///
    /// Returns the slot's cancellation token, or `None` when the
    /// correlation number is already pending, a protocol-level duplicate
    /// the caller must reject. The caller holds the bind region around
    /// this call.
    pub fn admit(&self, id: MessageId, parent: &CancellationToken) -> Option<CancellationToken> {
        match self.slots.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let slot = RequestSlot::new(id, parent);
                let token = slot.token().clone();
                vacant.insert(slot);
                Some(token)
            }
        }
    }

    /// Remove a slot after its operation completed normally. No-op when
    /// the id is not pending.
    pub fn remove(&self, id: MessageId) {
        self.slots.remove(&id);
    }

    /// Cancel and remove one pending operation.
    ///
    /// Returns whether a slot was actually abandoned; an absent id is a
    /// no-op, matching the protocol's abandon semantics.
    pub fn abandon(&self, id: MessageId) -> bool {
        match self.slots.remove(&id) {
            Some((_, slot)) => {
                slot.abandon();
                true
            }
            None => false,
        }
    }

    /// Abandon every pending operation except `except`.
    ///
    /// Used by the bind sequence so the bind request does not abandon
    /// itself. Observes `cancel` between iterations and aborts the drain
    /// with a cancellation error when the connection is being torn down.
    /// Tolerates slots vanishing concurrently; returns how many were
    /// abandoned.
    pub fn drain_except(
        &self,
        except: MessageId,
        cancel: &CancellationToken,
    ) -> Result<usize, ConnectionError> {
        let mut drained = 0;
        for id in self.ids() {
            if cancel.is_cancelled() {
                return Err(ConnectionError::Cancelled);
            }
            if id != except && self.abandon(id) {
                drained += 1;
            }
        }
        Ok(drained)
    }

    /// Cancel and remove every pending slot. The shutdown sweep.
    pub fn clear(&self) -> usize {
        let mut drained = 0;
        for id in self.ids() {
            if self.abandon(id) {
                drained += 1;
            }
        }
        drained
    }

    /// Whether any operation other than `except` is pending.
    pub fn others_pending(&self, except: MessageId) -> bool {
        self.slots.iter().any(|entry| *entry.key() != except)
    }

    /// Whether `id` is currently pending.
    pub fn contains(&self, id: MessageId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Number of currently pending operations.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no operation is pending.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Snapshot of the currently pending correlation numbers.
    fn ids(&self) -> Vec<MessageId> {
        self.slots.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_admission_rejected_until_removed() {
        let registry = PendingRegistry::new();
        let parent = CancellationToken::new();

        assert!(registry.admit(MessageId(7), &parent).is_some());
        assert!(registry.admit(MessageId(7), &parent).is_none());

        registry.remove(MessageId(7));
        assert!(registry.admit(MessageId(7), &parent).is_some());
    }

    #[test]
    fn abandon_cancels_and_removes() {
        let registry = PendingRegistry::new();
        let parent = CancellationToken::new();

        let token = registry.admit(MessageId(3), &parent).unwrap();
        assert!(registry.abandon(MessageId(3)));
        assert!(token.is_cancelled());
        assert!(!registry.contains(MessageId(3)));
    }

    #[test]
    fn abandon_absent_id_is_noop() {
        let registry = PendingRegistry::new();
        assert!(!registry.abandon(MessageId(99)));
        assert!(registry.is_empty());
    }

    #[test]
    fn drain_spares_the_requesting_operation() {
        let registry = PendingRegistry::new();
        let parent = CancellationToken::new();

        let t1 = registry.admit(MessageId(1), &parent).unwrap();
        let t2 = registry.admit(MessageId(2), &parent).unwrap();
        let t3 = registry.admit(MessageId(3), &parent).unwrap();
        let bind = registry.admit(MessageId(4), &parent).unwrap();

        assert_eq!(registry.drain_except(MessageId(4), &parent).unwrap(), 3);
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
        assert!(t3.is_cancelled());
        assert!(!bind.is_cancelled());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(MessageId(4)));
    }

    #[test]
    fn drain_aborts_with_cancellation_error_mid_teardown() {
        let registry = PendingRegistry::new();
        let parent = CancellationToken::new();
        registry.admit(MessageId(1), &parent).unwrap();

        parent.cancel();
        let err = registry.drain_except(MessageId(2), &parent).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn others_pending_ignores_own_slot() {
        let registry = PendingRegistry::new();
        let parent = CancellationToken::new();

        registry.admit(MessageId(5), &parent).unwrap();
        assert!(!registry.others_pending(MessageId(5)));

        registry.admit(MessageId(6), &parent).unwrap();
        assert!(registry.others_pending(MessageId(5)));
    }
}
