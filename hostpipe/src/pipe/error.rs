use std::io;

use thiserror::Error;

/// Error returned to the guest by `send` and `receive`.
///
/// The three variants mirror the guest pipe ABI; [`guest_code`](Self::guest_code)
/// yields the value written back into the guest's status register.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PipeError {
    /// The operation would block, or the connection is still being
    /// established. The guest should re-arm with `wake_on` and retry.
    #[error("operation would block")]
    Again,

    /// The operation is not valid in the current state, e.g. the guest
    /// handle is already gone.
    #[error("invalid pipe operation")]
    Inval,

    /// Unrecoverable transport failure; the connection is closing.
    #[error("pipe transport failure")]
    Io,
}

impl PipeError {
    /// Guest ABI status code for this error.
    pub fn guest_code(self) -> i32 {
        match self {
            PipeError::Inval => -1,
            PipeError::Again => -2,
            PipeError::Io => -4,
        }
    }

    /// Classifies an OS error from a failed transfer attempt.
    pub(crate) fn from_io(err: &io::Error) -> Self {
        if err.kind() == io::ErrorKind::WouldBlock {
            PipeError::Again
        } else {
            PipeError::Io
        }
    }
}

/// Error returned when a pipe cannot be opened.
///
/// The guest layer reports every variant as a null connection; the
/// distinction only matters for logging and tests.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("no pipe service named `{0}`")]
    UnknownService(String),

    #[error("missing pipe address")]
    MissingAddress,

    #[error("invalid loopback port `{0}`")]
    InvalidPort(String),

    #[error("invalid unix socket path `{0}`")]
    InvalidPath(String),

    /// The rendering library is not loaded or has not published an
    /// endpoint yet.
    #[error("renderer endpoint unavailable")]
    RendererUnavailable,

    #[error("connect failed: {0}")]
    Connect(#[from] io::Error),
}
