//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → connections close → exit
//!
//! Per-connection teardown is owned by conn::Connection; this module
//! only coordinates the server-wide signal.
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept first, then let sessions drain
//! - Connection cancellation is cooperative and per-connection

pub mod shutdown;

pub use shutdown::Shutdown;
