use crate::pipe::transfer::ByteStream;
use crate::reactor::poller::platform::{
    RawFd, sys_close, sys_get_socket_error, sys_recv, sys_send, sys_set_nodelay,
};

use std::io;
use std::os::fd::AsRawFd;

/// A non-blocking host socket.
///
/// `Socket` exclusively owns its descriptor and closes it on drop. The
/// descriptor is never shared with another owner, so dropping the value
/// is the only way the descriptor gets released.
#[derive(Debug)]
pub struct Socket {
    fd: RawFd,
}

impl Socket {
    /// Takes ownership of a non-blocking socket descriptor.
    pub(crate) fn from_raw(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Reads and clears the pending socket error.
    ///
    /// This is how a non-blocking connect is resolved once the socket
    /// reports write readiness: `Ok(None)` means the connection is
    /// established.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        sys_get_socket_error(self.fd)
    }

    /// Disables Nagle's algorithm. Only meaningful for TCP sockets.
    pub fn set_nodelay(&self) -> io::Result<()> {
        sys_set_nodelay(self.fd)
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl ByteStream for Socket {
    fn send_once(&mut self, buffer: &[u8]) -> io::Result<usize> {
        let n = sys_send(self.fd, buffer);
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(n as usize)
    }

    fn recv_once(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let n = sys_recv(self.fd, buffer);
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(n as usize)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}
