//! `kqueue`-based poller implementation for macOS and the BSDs.
//!
//! Exposes the same interface as the epoll backend. Read and write
//! interests map to separate `EVFILT_READ` / `EVFILT_WRITE` filters, so an
//! interest change adds the wanted filters and deletes the others.

use super::common::Interest;
use crate::reactor::event::{Event, push_merged};

use libc::{
    EV_ADD, EV_DELETE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_WRITE, kevent, kqueue, timespec,
};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use std::{mem, ptr};

/// `kqueue` poller.
pub(crate) struct KqueuePoller {
    kq: RawFd,
    events: Vec<libc::kevent>,
}

impl KqueuePoller {
    /// Creates a new `KqueuePoller` able to report `capacity` records per round.
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let kq = unsafe { kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        unsafe { libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC) };

        Ok(Self {
            kq,
            events: Vec::with_capacity(capacity.max(1)),
        })
    }

    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.apply(fd, token, interest)
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.apply(fd, token, interest)
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.apply(fd, 0, Interest::NONE)
    }

    fn apply(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.change(fd, token, EVFILT_READ, interest.read)?;
        self.change(fd, token, EVFILT_WRITE, interest.write)
    }

    fn change(&self, fd: RawFd, token: u64, filter: i16, enable: bool) -> io::Result<()> {
        let mut change: libc::kevent = unsafe { mem::zeroed() };
        change.ident = fd as _;
        change.filter = filter as _;
        change.flags = (if enable { EV_ADD } else { EV_DELETE }) as _;
        change.udata = token as usize as _;

        let rc = unsafe { kevent(self.kq, &change, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // Deleting a filter that was never added is not a failure.
            if !enable && err.raw_os_error() == Some(libc::ENOENT) {
                return Ok(());
            }
            return Err(err);
        }

        Ok(())
    }

    /// Polls for readiness events.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let ts = timeout.map(|t| timespec {
            tv_sec: t.as_secs() as _,
            tv_nsec: t.subsec_nanos() as _,
        });
        let ts_ptr = ts.as_ref().map_or(ptr::null(), |t| t as *const timespec);

        events.clear();

        let n = unsafe {
            kevent(
                self.kq,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as _,
                ts_ptr,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            let token = ev.udata as usize as u64;
            let mut event = Event::new(token);

            if ev.filter == EVFILT_READ as _ {
                event.readable = true;
            }
            if ev.filter == EVFILT_WRITE as _ {
                event.writable = true;
                if ev.flags & EV_EOF as u16 != 0 && ev.fflags != 0 {
                    event.error = true;
                }
            }
            if ev.flags & EV_ERROR as u16 != 0 {
                event.error = true;
            }

            push_merged(events, event);
        }

        Ok(())
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.kq) };
    }
}
