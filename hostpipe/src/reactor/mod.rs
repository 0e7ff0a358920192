//! Readiness layer.
//!
//! This module implements the host I/O readiness component used by the
//! pipe engine. It is responsible for:
//! - registering socket descriptors with read/write interests,
//! - waiting for readiness without ever blocking on a socket itself,
//! - reporting which registration became readable, writable or failed.
//!
//! Everything here runs on the single thread that drives the pipe engine.
//! Guest-facing code never talks to the poller directly; the engine keeps
//! the installed interest of each connection in sync with its state.

pub(crate) mod event;
pub(crate) mod poller;

pub(crate) use event::Event;
pub(crate) use poller::{Interest, Poller};
