//! Identity state and the verification seam.
//!
//! # Responsibilities
//! - Represent the principal currently associated with a connection
//! - Define the identity-verification boundary invoked by the bind sequence
//!
//! # Design Decisions
//! - The principal is an immutable snapshot; the connection swaps whole
//!   values under the bind region and readers load once per operation
//! - Credential validation itself is an external collaborator behind the
//!   [`Authenticator`] trait

use async_trait::async_trait;
use thiserror::Error;

use crate::proto::BindCredentials;

/// The authenticated identity associated with a connection.
///
/// A freshly accepted connection carries the anonymous principal until a
/// bind succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    name: Option<String>,
}

impl Principal {
    /// The unauthenticated principal every connection starts with.
    pub fn anonymous() -> Self {
        Self { name: None }
    }

    /// A principal authenticated as `name`.
    pub fn authenticated(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Whether this is the anonymous principal.
    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }

    /// Distinguished name, if authenticated.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => f.write_str("anonymous"),
        }
    }
}

/// Errors from the identity-verification service.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The presented credentials do not match any identity.
    #[error("invalid credentials for {name:?}")]
    InvalidCredentials { name: String },

    /// The verification backend could not be consulted.
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

/// Identity-verification service consulted by the bind sequence.
///
/// Invoked after the connection has drained its pending operations and
/// before the new principal is committed.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify credentials, producing the principal to install.
    async fn verify(&self, credentials: &BindCredentials) -> Result<Principal, AuthError>;
}
