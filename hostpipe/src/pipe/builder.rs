use std::io;
use std::sync::Arc;

use super::PipeEngine;
use super::service::{PipeService, TcpService, UnixService};
use crate::render::{RenderBridge, RenderService};

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configures and creates a [`PipeEngine`].
///
/// The `tcp` and `unix` services are registered by default. Registering a
/// service under a name that is already taken replaces the earlier one.
pub struct EngineBuilder {
    event_capacity: usize,
    services: Vec<Box<dyn PipeService>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            services: vec![Box::new(TcpService), Box::new(UnixService)],
        }
    }

    /// Maximum number of readiness events collected per round.
    pub fn event_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "event_capacity must be > 0");

        self.event_capacity = n;
        self
    }

    pub fn service(mut self, service: impl PipeService + 'static) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Registers the `opengles` service backed by `bridge`.
    pub fn render_bridge(self, bridge: Arc<RenderBridge>) -> Self {
        self.service(RenderService::new(bridge))
    }

    pub fn build(self) -> io::Result<PipeEngine> {
        PipeEngine::new(self.event_capacity, self.services)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "event_capacity must be > 0")]
    fn test_zero_event_capacity_panics() {
        let _ = EngineBuilder::new().event_capacity(0);
    }

    #[test]
    fn test_build_starts_empty() {
        let engine = EngineBuilder::default().event_capacity(8).build().unwrap();
        assert!(engine.is_empty());
    }
}
