use super::bridge::RenderBridge;
use crate::net::{Socket, Target};
use crate::pipe::{OpenError, PipeService};

use std::io;
use std::sync::Arc;

/// `opengles` pipes to the rendering library's published endpoint.
///
/// The guest's argument string is ignored. The endpoint is read from the
/// bridge on every open, so pipes opened after a renderer restart follow
/// the new address. A purely numeric address is a loopback TCP port,
/// anything else a Unix-domain socket path.
pub struct RenderService {
    bridge: Arc<RenderBridge>,
}

impl RenderService {
    pub fn new(bridge: Arc<RenderBridge>) -> Self {
        Self { bridge }
    }
}

impl PipeService for RenderService {
    fn name(&self) -> &str {
        "opengles"
    }

    fn resolve(&self, _args: &str) -> Result<Target, OpenError> {
        let address = self
            .bridge
            .server_path()
            .ok_or(OpenError::RendererUnavailable)?;

        if address.bytes().all(|b| b.is_ascii_digit()) {
            Target::tcp_port(&address)
        } else {
            Target::unix_path(&address)
        }
    }

    /// Small wire-protocol packets must not wait on Nagle.
    fn prepare(&self, socket: &Socket, target: &Target) -> io::Result<()> {
        if target.is_tcp() {
            socket.set_nodelay()?;
        }

        Ok(())
    }
}
