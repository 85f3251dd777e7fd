//! Protocol message model and codec boundary.
//!
//! # Data Flow
//! ```text
//! Inbound bytes
//!     → Codec::decode (external implementation)
//!     → Request { message_id, op }
//!     → server::ConnectionDriver dispatch
//!
//! Response
//!     → Codec::encode
//!     → conn::Connection::write_frame (write region)
//! ```
//!
//! # Design Decisions
//! - The byte-level grammar lives outside this crate; only the structured
//!   shapes the connection core needs are defined here
//! - Message ids are client-assigned; id 0 is reserved for unsolicited
//!   server notices and is never admitted as a pending operation

pub mod codec;
pub mod message;

pub use codec::{Codec, CodecError};
pub use message::{
    BindCredentials, MessageId, OperationKind, OperationRequest, ProtocolOp, Request, Response,
    ResultCode, NOTICE_OF_DISCONNECTION_OID, STARTTLS_OID,
};
