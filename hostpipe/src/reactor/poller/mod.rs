//! Platform-specific readiness poller.
//!
//! This module provides a unified interface over the OS multiplexers
//! (epoll on Linux, kqueue on macOS and the BSDs).
//!
//! The poller is used by the pipe engine to:
//! - install, update and remove per-connection interests,
//! - wait for readiness with an optional timeout,
//! - translate kernel records into [`Event`](crate::reactor::Event)s.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

pub(crate) mod common;

pub(crate) use common::Interest;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
mod kqueue;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
pub(crate) type Poller = kqueue::KqueuePoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
