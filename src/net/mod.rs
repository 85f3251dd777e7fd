//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → transport.rs (plain stream, later swapped for TLS by STARTTLS)
//!     → conn::Connection (regions, registry, lifecycle)
//!
//! TLS material:
//!     tls.rs loads PEM certificate/key → rustls acceptor
//!     → conn::upgrade performs the in-band handshake
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - TLS is never configured at accept time; connections start plaintext
//!   and upgrade in-band via STARTTLS

pub mod listener;
pub mod tls;
pub mod transport;

pub use listener::{Listener, ListenerError};
pub use tls::load_acceptor;
pub use transport::Transport;
