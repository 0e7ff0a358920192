//! # hostpipe
//!
//! **hostpipe** is the host side of a virtual-pipe transport: it lets a process running
//! inside a virtual machine open byte-stream connections to host endpoints through an
//! opaque pipe handle, without ever blocking the emulation thread.
//!
//! Every guest operation is turned into non-blocking host I/O, and host readiness is turned
//! back into asynchronous wake signals the guest can observe. The engine runs on a single
//! thread, driven by epoll (Linux) or kqueue (macOS and the BSDs).
//!
//! It provides:
//!
//! - A **non-blocking connector** for loopback TCP ports and Unix-domain sockets
//! - A **scatter/gather transfer engine** that spans guest buffer regions
//! - A **connection state machine** that settles racing guest and socket closes
//! - A **wake protocol** that delivers each requested readiness exactly once
//! - A **rendering bridge** that loads the GPU emulation library and backs `opengles` pipes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hostpipe::pipe::{EngineBuilder, GuestPipe, WakeFlags};
//! use std::rc::{Rc, Weak};
//! use std::time::Duration;
//!
//! struct Guest;
//!
//! impl GuestPipe for Guest {
//!     fn wake(&self, flags: WakeFlags) {
//!         println!("ready: {flags:?}");
//!     }
//!
//!     fn signal_closed(&self) {
//!         println!("host side closed");
//!     }
//! }
//!
//! let mut engine = EngineBuilder::new().build()?;
//! let guest = Rc::new(Guest);
//!
//! let id = engine.open("tcp", Rc::downgrade(&guest) as Weak<dyn GuestPipe>, "5037")?;
//! engine.wake_on(id, WakeFlags::WRITE);
//!
//! loop {
//!     engine.turn(Some(Duration::from_millis(16)))?;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`pipe`]: Pipe engine, services, wake flags and transfers
//! - [`net`]: Non-blocking host sockets and the connector
//! - [`render`]: GPU emulation library bridge and the `opengles` service

mod reactor;
mod utils;

pub mod net;
pub mod pipe;
pub mod render;

pub use pipe::{ConnectionId, EngineBuilder, GuestPipe, PipeEngine, PipeError, WakeFlags};
