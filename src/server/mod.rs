//! Server plumbing around the connection core.
//!
//! # Data Flow
//! ```text
//! net::Listener accept
//!     → acceptor.rs (one driver task per connection)
//!     → dispatch.rs (frame loop: decode, admit, route)
//!         ├─ bind / STARTTLS / abandon / unbind handled in place
//!         └─ other operations spawned onto OperationHandler tasks
//! ```
//!
//! # Design Decisions
//! - The driver owns the read loop; handlers own their operation's
//!   lifetime until they remove its slot
//! - Codec and handler are trait objects supplied by the embedding
//!   application; this crate ships neither a wire grammar nor operation
//!   semantics

pub mod acceptor;
pub mod dispatch;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::proto::{Request, Response};

pub use acceptor::DirectoryServer;
pub use dispatch::{ConnectionDriver, DriverError};

/// Processes one admitted directory operation.
///
/// The handler is the sole owner of the operation between admission and
/// completion. It must observe `cancel` and stop promptly when it fires;
/// a cancelled operation owes no response and `None` is the conventional
/// return in that case.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Handle one request, returning the response to send, if any.
    async fn handle(&self, request: Request, cancel: CancellationToken) -> Option<Response>;
}
