//! Bridge to the GPU emulation library.
//!
//! The library is loaded once per process, its entry points are resolved
//! into a [`RendererApi`] table, and the endpoint address it publishes
//! on start backs the `opengles` pipe service.

mod api;
mod bridge;
mod error;
mod library;
mod service;

pub use api::{
    FbWindow, HardwareStrings, LibraryRenderer, PostCallback, REQUIRED_SYMBOLS, RendererApi,
    StreamMode,
};
pub use bridge::{RenderBridge, RenderConfig};
pub use error::RenderError;
pub use library::DynamicLibrary;
pub use service::RenderService;
