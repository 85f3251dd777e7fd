//! Bookkeeping record for one in-flight operation.

use tokio_util::sync::CancellationToken;

use crate::proto::MessageId;

/// One pending operation on a connection.
///
/// Carries the client's correlation number and a cancellation token
/// derived from the connection's token, so closing the connection cancels
/// every slot while abandoning one slot leaves its siblings untouched.
#[derive(Debug)]
pub struct RequestSlot {
    id: MessageId,
    cancel: CancellationToken,
}

impl RequestSlot {
    /// Create a slot whose token is a child of `parent`.
    pub fn new(id: MessageId, parent: &CancellationToken) -> Self {
        Self {
            id,
            cancel: parent.child_token(),
        }
    }

    /// Correlation number of the operation this slot tracks.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// The slot's cancellation token, handed to the operation's handler.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Signal cancellation of this operation. Cooperative: the handler
    /// observes the token and stops; nothing is forcibly interrupted.
    pub fn abandon(&self) {
        self.cancel.cancel();
    }
}
