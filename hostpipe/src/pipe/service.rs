use super::error::OpenError;
use crate::net::{Socket, Target};

use std::io;

/// A named pipe variant the guest can open.
///
/// A service turns the guest-supplied argument string into a connection
/// target and may tune the socket before it is handed to the engine.
/// Everything after that (state machine, transfers, wakes) is shared by
/// all services.
pub trait PipeService {
    /// Name the guest uses to select this service, e.g. `"tcp"`.
    fn name(&self) -> &str;

    /// Resolves the guest's argument string into a target.
    fn resolve(&self, args: &str) -> Result<Target, OpenError>;

    /// Adjusts a freshly created socket. Failures are logged, not fatal.
    fn prepare(&self, _socket: &Socket, _target: &Target) -> io::Result<()> {
        Ok(())
    }

    /// Whether open connections of this service survive a snapshot.
    ///
    /// Host sockets cannot be saved, so every built-in service answers
    /// `false` and in-flight connections are dropped across a restore.
    fn can_snapshot(&self) -> bool {
        false
    }
}

/// `tcp:<port>` pipes to the host loopback address.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpService;

impl PipeService for TcpService {
    fn name(&self) -> &str {
        "tcp"
    }

    fn resolve(&self, args: &str) -> Result<Target, OpenError> {
        Target::tcp_port(args)
    }
}

/// `unix:<path>` pipes to a host Unix-domain socket.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnixService;

impl PipeService for UnixService {
    fn name(&self) -> &str {
        "unix"
    }

    fn resolve(&self, args: &str) -> Result<Target, OpenError> {
        Target::unix_path(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_services_resolve_their_arguments() {
        assert_eq!(TcpService.resolve("22").unwrap(), Target::Loopback(22));
        assert!(UnixService.resolve("/run/x.sock").is_ok());

        assert!(!TcpService.can_snapshot());
        assert!(!UnixService.can_snapshot());
    }
}
