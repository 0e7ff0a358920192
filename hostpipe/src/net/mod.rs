//! Host socket primitives.
//!
//! This module provides the non-blocking socket wrapper owned by each
//! pipe connection, and the connector that turns a pipe target (a
//! loopback TCP port or a Unix-domain path) into a pending connection.
//!
//! Sockets created here are always non-blocking and close-on-exec; they
//! are only ever driven through readiness events, never waited on.

mod connector;
mod socket;

pub use connector::{Target, connect};
pub use socket::Socket;
