use super::error::PipeError;
use super::guest::GuestPipe;
use super::transfer;
use super::wake::{Notifier, WakeFlags};
use crate::net::Socket;
use crate::reactor::Interest;

use std::fmt;
use std::io;
use std::rc::{Rc, Weak};

/// Lifecycle of a pipe connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, no socket yet.
    Init,
    /// Non-blocking connect issued, waiting for write readiness.
    Connecting,
    /// Connected; bytes flow in both directions.
    Connected,
    /// The guest closed the pipe. Terminal: the connection is freed
    /// immediately.
    ClosingFromGuest,
    /// The socket failed or the connect was refused. The connection
    /// lingers until the guest acknowledges with a close.
    ClosingFromSocket,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Init => "init",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ClosingFromGuest => "closing-from-guest",
            ConnectionState::ClosingFromSocket => "closing-from-socket",
        };

        f.write_str(name)
    }
}

/// What the owner must do with a connection after a socket-side close.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Keep the connection alive.
    Keep,
    /// Release the connection now.
    Free,
}

/// One guest-to-host byte stream.
///
/// The connection exclusively owns its socket and is the only writer of
/// its own state. It never touches the poller itself: after every call
/// that changes state or wake interest, the owner reads
/// [`interest`](Self::interest) and installs it.
pub(crate) struct Connection {
    guest: Option<Weak<dyn GuestPipe>>,
    socket: Option<Socket>,
    state: ConnectionState,
    notifier: Notifier,

    /// Interest currently registered with the poller.
    installed: Option<Interest>,
}

impl Connection {
    pub(crate) fn new(guest: Weak<dyn GuestPipe>) -> Self {
        Self {
            guest: Some(guest),
            socket: None,
            state: ConnectionState::Init,
            notifier: Notifier::default(),
            installed: None,
        }
    }

    /// Takes ownership of a pending socket and enters `Connecting`.
    pub(crate) fn begin_connect(&mut self, socket: Socket) {
        debug_assert_eq!(self.state, ConnectionState::Init);

        self.socket = Some(socket);
        self.state = ConnectionState::Connecting;
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn socket(&self) -> Option<&Socket> {
        self.socket.as_ref()
    }

    pub(crate) fn has_guest(&self) -> bool {
        self.guest.is_some()
    }

    pub(crate) fn installed(&self) -> Option<Interest> {
        self.installed
    }

    pub(crate) fn set_installed(&mut self, interest: Option<Interest>) {
        self.installed = interest;
    }

    /// Readiness interest implied by the current state and wake mask.
    ///
    /// Write readiness doubles as the connect completion signal, so it is
    /// always wanted while connecting. Read readiness only matters once
    /// connected. Closing connections listen for nothing.
    pub(crate) fn interest(&self) -> Interest {
        let wanted = self.notifier.wanted();

        match self.state {
            ConnectionState::Connecting => Interest {
                read: false,
                write: true,
            },
            ConnectionState::Connected => Interest {
                read: wanted.contains(WakeFlags::READ),
                write: wanted.contains(WakeFlags::WRITE),
            },
            _ => Interest::NONE,
        }
    }

    /// Reads the outcome of the pending connect from the socket.
    pub(crate) fn connect_result(&self) -> io::Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        match socket.take_error()? {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Applies the outcome of the pending connect.
    ///
    /// Only meaningful in `Connecting`; any later call is ignored so the
    /// completion fires at most once.
    pub(crate) fn complete_connect(&mut self, result: io::Result<()>) -> Disposition {
        if self.state != ConnectionState::Connecting {
            return Disposition::Keep;
        }

        match result {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                Disposition::Keep
            }
            Err(_) => self.close_from_socket(),
        }
    }

    /// Handles the socket failing underneath the connection.
    ///
    /// A guest close always wins: if the guest already closed, the
    /// connection is freed without notifying anyone. Otherwise the guest
    /// is told the pipe failed and the back-reference is dropped.
    pub(crate) fn close_from_socket(&mut self) -> Disposition {
        if self.state == ConnectionState::ClosingFromGuest {
            return Disposition::Free;
        }

        self.state = ConnectionState::ClosingFromSocket;
        self.notifier.disarm();

        match self.guest.take().and_then(|weak| weak.upgrade()) {
            Some(guest) => {
                guest.signal_closed();
                Disposition::Keep
            }
            None => Disposition::Free,
        }
    }

    /// Handles the guest closing its pipe.
    ///
    /// The guest reference is dropped first so no later path can reach
    /// it. The socket stays owned until the connection itself is dropped,
    /// after the owner removed its poller registration.
    pub(crate) fn close_from_guest(&mut self) {
        self.guest = None;
        self.notifier.disarm();
        self.state = ConnectionState::ClosingFromGuest;
    }

    /// Drops the guest reference without closing the connection.
    pub(crate) fn detach_guest(&mut self) {
        self.guest = None;
        self.notifier.disarm();
    }

    /// The socket reported data or a hang-up.
    pub(crate) fn on_readable(&mut self) {
        self.observe(WakeFlags::READ);
    }

    /// The socket can accept more bytes.
    pub(crate) fn on_writable(&mut self) {
        self.observe(WakeFlags::WRITE);
    }

    fn observe(&mut self, direction: WakeFlags) {
        if let Some(flags) = self.notifier.observe(direction) {
            if let Some(guest) = self.guest() {
                guest.wake(flags);
            }
        }
    }

    fn guest(&self) -> Option<Rc<dyn GuestPipe>> {
        self.guest.as_ref().and_then(|weak| weak.upgrade())
    }

    /// Re-arms the guest's wake interest.
    pub(crate) fn wake_on(&mut self, flags: WakeFlags) {
        self.notifier.arm(flags);
    }

    /// Readiness observed since the guest last re-armed.
    pub(crate) fn poll(&self) -> WakeFlags {
        self.notifier.observed()
    }

    /// Checks that bytes may flow in the current state.
    pub(crate) fn ready(&self) -> Result<(), PipeError> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Connecting => Err(PipeError::Again),
            _ if self.guest.is_none() => Err(PipeError::Inval),
            _ => Err(PipeError::Io),
        }
    }

    pub(crate) fn send(&mut self, regions: &[&[u8]]) -> Result<usize, PipeError> {
        self.ready()?;
        let socket = self.socket.as_mut().ok_or(PipeError::Inval)?;

        transfer::send(socket, regions)
    }

    pub(crate) fn receive(&mut self, regions: &mut [&mut [u8]]) -> Result<usize, PipeError> {
        self.ready()?;
        let socket = self.socket.as_mut().ok_or(PipeError::Inval)?;

        transfer::receive(socket, regions)
    }
}
