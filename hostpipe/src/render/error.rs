use thiserror::Error;

/// Error raised by the rendering bridge.
///
/// A failure here disables the `opengles` service only; every other pipe
/// keeps working.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("failed to load `{name}`: {reason}")]
    Load { name: String, reason: String },

    /// The library does not export a required entry point. Usually a
    /// version mismatch between host and renderer.
    #[error("renderer library is missing `{0}`")]
    MissingSymbol(&'static str),

    #[error("renderer library initialization failed")]
    Init,

    #[error("renderer is not started")]
    NotStarted,

    #[error("renderer failed to start")]
    Start,

    #[error("failed to create renderer subwindow")]
    Window,
}
