//! Structured request and response messages.
//!
//! These are the shapes a codec implementation produces and consumes. The
//! connection core only inspects the message id and the operation kind;
//! operation payloads stay opaque to it.

use serde::{Deserialize, Serialize};

/// Extended-operation OID requesting a TLS upgrade of the session.
pub const STARTTLS_OID: &str = "1.3.6.1.4.1.1466.20037";

/// Extended-response OID for the unsolicited disconnection notice.
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";

/// Client-assigned correlation number for one request.
///
/// Unique among the operations currently pending on a connection; a value
/// may be reused once its prior operation has been removed. Id 0 is
/// reserved for unsolicited server notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u32);

impl MessageId {
    /// Message id carried by unsolicited notices.
    pub const UNSOLICITED: MessageId = MessageId(0);
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// A decoded request as handed to the connection core by the codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Correlation number assigned by the client.
    pub message_id: MessageId,
    /// The operation this request carries.
    pub op: ProtocolOp,
}

/// The operations the connection core distinguishes.
///
/// Everything except bind, unbind, abandon, and the STARTTLS extended
/// operation is an opaque [`OperationRequest`] that merely occupies a
/// pending slot while a handler processes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolOp {
    /// Change the authenticated principal of the connection.
    Bind(BindCredentials),
    /// Terminate the connection; no response is expected.
    Unbind,
    /// Cancel one outstanding operation; no response is expected.
    Abandon {
        /// Message id of the operation to cancel.
        target: MessageId,
    },
    /// Extended operation, identified by OID. STARTTLS arrives this way.
    Extended {
        /// Operation OID.
        oid: String,
        /// Opaque request value, if any.
        value: Option<Vec<u8>>,
    },
    /// Any other directory operation, opaque to the core.
    Operation(OperationRequest),
}

/// Simple bind credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindCredentials {
    /// Distinguished name to bind as; empty means anonymous.
    pub name: String,
    /// Password; interpretation belongs to the identity service.
    pub password: String,
}

/// An operation the core tracks but does not interpret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Which directory operation this is.
    pub kind: OperationKind,
    /// Codec-defined payload, uninterpreted here.
    pub payload: Vec<u8>,
}

/// Directory operation kinds that occupy a pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Search,
    Add,
    Modify,
    Delete,
    Compare,
    ModifyDn,
}

impl OperationKind {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Search => "search",
            OperationKind::Add => "add",
            OperationKind::Modify => "modify",
            OperationKind::Delete => "delete",
            OperationKind::Compare => "compare",
            OperationKind::ModifyDn => "modify_dn",
        }
    }
}

/// Result codes the connection core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    OperationsError,
    ProtocolError,
    InvalidCredentials,
    Busy,
    Unavailable,
    UnwillingToPerform,
    Other,
}

/// A response message handed to the codec for encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Message id of the request being answered; 0 for unsolicited notices.
    pub message_id: MessageId,
    /// Outcome of the operation.
    pub code: ResultCode,
    /// Human-readable diagnostic, empty on success.
    pub diagnostic: String,
    /// Response OID for extended responses.
    pub oid: Option<String>,
    /// Codec-defined payload, uninterpreted here.
    pub payload: Vec<u8>,
}

impl Response {
    /// Build a plain operation result.
    pub fn result(message_id: MessageId, code: ResultCode, diagnostic: impl Into<String>) -> Self {
        Self {
            message_id,
            code,
            diagnostic: diagnostic.into(),
            oid: None,
            payload: Vec::new(),
        }
    }

    /// Build an extended response carrying an OID.
    pub fn extended(
        message_id: MessageId,
        code: ResultCode,
        oid: &str,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            code,
            diagnostic: diagnostic.into(),
            oid: Some(oid.to_string()),
            payload: Vec::new(),
        }
    }

    /// Build the unsolicited notice sent before a forced disconnect.
    pub fn disconnection_notice(code: ResultCode, diagnostic: impl Into<String>) -> Self {
        Self::extended(
            MessageId::UNSOLICITED,
            code,
            NOTICE_OF_DISCONNECTION_OID,
            diagnostic,
        )
    }
}
