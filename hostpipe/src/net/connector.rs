use super::socket::Socket;
use crate::pipe::OpenError;
use crate::reactor::poller::platform::{
    sys_close, sys_connect, sys_connect_unix, sys_inet_domain, sys_socket, sys_unix_domain,
};

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

use tracing::debug;

/// Where a pipe connection should be opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// A TCP port on the IPv4 loopback address.
    ///
    /// Only the port is configurable; guests cannot reach any other host.
    Loopback(u16),

    /// A Unix-domain stream socket path.
    Unix(PathBuf),
}

impl Target {
    /// Parses the argument string of a `tcp` pipe: a bare port number.
    pub fn tcp_port(args: &str) -> Result<Self, OpenError> {
        if args.is_empty() {
            return Err(OpenError::MissingAddress);
        }

        args.parse::<u16>()
            .map(Target::Loopback)
            .map_err(|_| OpenError::InvalidPort(args.to_owned()))
    }

    /// Parses the argument string of a `unix` pipe: a socket path.
    pub fn unix_path(args: &str) -> Result<Self, OpenError> {
        if args.is_empty() {
            return Err(OpenError::MissingAddress);
        }

        if args.contains('\0') {
            return Err(OpenError::InvalidPath(args.to_owned()));
        }

        Ok(Target::Unix(PathBuf::from(args)))
    }

    /// Returns `true` for TCP targets.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Target::Loopback(_))
    }

    fn socket_addr(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Loopback(port) => write!(f, "{}", Target::socket_addr(*port)),
            Target::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Starts a non-blocking connection to `target`.
///
/// The returned socket is still pending even when the OS completed the
/// handshake synchronously: the caller resolves it on the first write
/// readiness report by reading [`Socket::take_error`]. Failures the OS
/// reports immediately are returned as errors.
pub fn connect(target: &Target) -> io::Result<Socket> {
    let (fd, started) = match target {
        Target::Loopback(port) => {
            let addr = Target::socket_addr(*port);
            let fd = sys_socket(sys_inet_domain())?;

            (fd, sys_connect(fd, &addr))
        }

        Target::Unix(path) => {
            let fd = sys_socket(sys_unix_domain())?;

            (fd, sys_connect_unix(fd, path))
        }
    };

    match started {
        Ok(()) => {
            debug!(%target, fd, "connected immediately");
            Ok(Socket::from_raw(fd))
        }

        Err(err) if is_in_progress(&err) => {
            debug!(%target, fd, "connect in progress");
            Ok(Socket::from_raw(fd))
        }

        Err(err) => {
            debug!(%target, error = %err, "connect failed");
            sys_close(fd);
            Err(err)
        }
    }
}

fn is_in_progress(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EINPROGRESS) | Some(libc::EINTR)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_port_accepts_only_port_numbers() {
        assert_eq!(Target::tcp_port("5037").unwrap(), Target::Loopback(5037));

        assert!(matches!(
            Target::tcp_port(""),
            Err(OpenError::MissingAddress)
        ));
        assert!(matches!(
            Target::tcp_port("10.0.0.1:80"),
            Err(OpenError::InvalidPort(_))
        ));
        assert!(matches!(
            Target::tcp_port("70000"),
            Err(OpenError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_unix_path_rejects_empty() {
        assert!(matches!(
            Target::unix_path(""),
            Err(OpenError::MissingAddress)
        ));
        assert_eq!(
            Target::unix_path("/tmp/sock").unwrap(),
            Target::Unix(PathBuf::from("/tmp/sock"))
        );
    }

    #[test]
    fn test_display_pins_loopback_host() {
        assert_eq!(Target::Loopback(80).to_string(), "127.0.0.1:80");
    }

    #[test]
    fn test_connect_to_missing_unix_path_fails() {
        let target = Target::Unix(PathBuf::from("/nonexistent/hostpipe/socket"));
        assert!(connect(&target).is_err());
    }
}
