use libc::{
    AF_INET, AF_UNIX, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, IPPROTO_TCP, O_NONBLOCK,
    SO_ERROR, SOCK_STREAM, SOL_SOCKET, TCP_NODELAY, c_int, close, connect, fcntl, getsockopt,
    recv, send, setsockopt, sockaddr, sockaddr_in, sockaddr_un,
    socket, socklen_t,
};
use std::net::SocketAddrV4;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::{io, mem};

pub(crate) use std::os::fd::RawFd;

/// Flags passed to every `send(2)` so a vanished peer reports `EPIPE`
/// instead of raising `SIGPIPE` in the host process.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const SEND_FLAGS: c_int = 0;

/// Sends bytes on a connected socket.
///
/// Returns the number of bytes sent, or a negative value on error.
/// The socket **must** be non-blocking.
pub(crate) fn sys_send(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe { send(fd, buffer.as_ptr() as *const _, buffer.len(), SEND_FLAGS) }
}

/// Receives bytes from a connected socket.
///
/// Returns the number of bytes received, `0` at end of stream, or a
/// negative value on error. The socket **must** be non-blocking.
pub(crate) fn sys_recv(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { recv(fd, buffer.as_mut_ptr() as *mut _, buffer.len(), 0) }
}

/// Closes a file descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Sets a file descriptor to non-blocking, close-on-exec mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFD, FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Creates a non-blocking stream socket.
pub(crate) fn sys_socket(domain: c_int) -> io::Result<RawFd> {
    let fd = unsafe { socket(domain, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_set_nonblocking(fd).and_then(|_| sys_set_nosigpipe(fd)) {
        unsafe { close(fd) };
        return Err(e);
    }

    Ok(fd)
}

#[cfg(target_vendor = "apple")]
fn sys_set_nosigpipe(fd: RawFd) -> io::Result<()> {
    sys_set_flag(fd, SOL_SOCKET, libc::SO_NOSIGPIPE, true)
}

#[cfg(not(target_vendor = "apple"))]
fn sys_set_nosigpipe(_fd: RawFd) -> io::Result<()> {
    Ok(())
}

/// Returns the IPv4 socket family.
pub(crate) fn sys_inet_domain() -> c_int {
    AF_INET
}

/// Returns the Unix-domain socket family.
pub(crate) fn sys_unix_domain() -> c_int {
    AF_UNIX
}

/// Initiates a non-blocking connection to an IPv4 address.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddrV4) -> io::Result<()> {
    let (sa, len) = socketaddr_to_sockaddr_in(addr);

    let rc = unsafe { connect(fd, &sa as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Initiates a non-blocking connection to a Unix-domain socket path.
pub(crate) fn sys_connect_unix(fd: RawFd, path: &Path) -> io::Result<()> {
    let (addr, len) = path_to_sockaddr_un(path)?;

    let rc = unsafe { connect(fd, &addr as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Retrieves and clears the pending socket error via `SO_ERROR`.
///
/// Returns `Ok(None)` when no error is pending.
pub(crate) fn sys_get_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut err: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    let rc = unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut err as *mut _ as *mut _,
            &mut len,
        )
    };

    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    if err == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(err)))
    }
}

/// Disables Nagle's algorithm on a TCP socket.
pub(crate) fn sys_set_nodelay(fd: RawFd) -> io::Result<()> {
    sys_set_flag(fd, IPPROTO_TCP, TCP_NODELAY, true)
}

fn sys_set_flag(fd: RawFd, level: c_int, name: c_int, on: bool) -> io::Result<()> {
    let value: c_int = if on { 1 } else { 0 };
    let rc = unsafe {
        setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Converts a `SocketAddrV4` to a `sockaddr_in`.
pub(crate) fn socketaddr_to_sockaddr_in(addr: &SocketAddrV4) -> (sockaddr_in, socklen_t) {
    let mut sa: sockaddr_in = unsafe { mem::zeroed() };
    sa.sin_family = AF_INET as _;
    sa.sin_port = addr.port().to_be();
    sa.sin_addr.s_addr = u32::from(*addr.ip()).to_be();

    (sa, mem::size_of::<sockaddr_in>() as socklen_t)
}

/// Builds a `sockaddr_un` for `path`.
///
/// Fails with `InvalidInput` for empty paths, paths containing NUL and
/// paths that do not fit `sun_path` with a terminator.
pub(crate) fn path_to_sockaddr_un(path: &Path) -> io::Result<(sockaddr_un, socklen_t)> {
    let mut addr: sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = AF_UNIX as _;

    let bytes = path.as_os_str().as_bytes();

    if bytes.is_empty() || bytes.contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid unix socket path",
        ));
    }

    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "unix socket path too long",
        ));
    }

    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as _;
    }

    let len = mem::offset_of!(sockaddr_un, sun_path) + bytes.len() + 1;

    Ok((addr, len as socklen_t))
}
