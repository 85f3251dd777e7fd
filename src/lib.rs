//! Directory server connection core.
//!
//! Per-connection concurrency and lifecycle machinery for an LDAP-style
//! directory server: pending-operation tracking, exclusive bind-region
//! semantics, the STARTTLS upgrade sequence, abandonment, and teardown.
//!
//! # Architecture Overview
//!
//! ```text
//! Incoming TCP connection
//!     → net::listener (accept loop, connection limits)
//!     → conn::Connection (regions, pending registry, cancellation tree)
//!     → server::ConnectionDriver (frame loop, dispatch)
//!         ├─ bind        → drain pending, verify, swap principal
//!         ├─ STARTTLS    → drain check, handshake, transport swap
//!         ├─ abandon     → cancel one pending slot
//!         ├─ unbind      → close connection
//!         └─ other ops   → admitted, handed to OperationHandler tasks
//!
//! Cross-cutting: config, lifecycle (server shutdown), observability
//! ```
//!
//! The wire codec is a trait boundary ([`proto::Codec`]); this crate does
//! not define the byte-level protocol grammar.

// Core subsystems
pub mod conn;
pub mod net;
pub mod proto;
pub mod server;

// Collaborator seams
pub mod auth;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::ServerConfig;
pub use conn::Connection;
pub use lifecycle::Shutdown;
pub use server::{ConnectionDriver, DirectoryServer, OperationHandler};
