//! Guest pipe connections backed by host sockets.
//!
//! A guest opens a pipe by service name (`tcp`, `unix`, `opengles`, ...)
//! and gets back a [`ConnectionId`]. From then on it moves bytes with
//! [`PipeEngine::send`] and [`PipeEngine::receive`], asks to be woken with
//! [`PipeEngine::wake_on`], and eventually closes the pipe. The engine
//! reports readiness and host-side failures through the guest's
//! [`GuestPipe`] callbacks.

mod builder;
mod connection;
mod engine;
mod error;
mod guest;
mod service;
mod wake;

pub mod transfer;

pub use builder::EngineBuilder;
pub use connection::ConnectionState;
pub use engine::{ConnectionId, PipeEngine};
pub use error::{OpenError, PipeError};
pub use guest::GuestPipe;
pub use service::{PipeService, TcpService, UnixService};
pub use wake::WakeFlags;
