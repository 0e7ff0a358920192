/// A readiness event reported by the poller.
///
/// An `Event` carries readiness information for one registered
/// descriptor. Several kernel records for the same descriptor are
/// merged into a single event per poll round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Event {
    /// Token associated with the registered descriptor.
    ///
    /// The engine encodes a generational connection id into it, so a
    /// token outliving its connection never resolves to a newer one.
    pub(crate) token: u64,

    /// The descriptor is readable, or the peer hung up.
    pub(crate) readable: bool,

    /// The descriptor is writable.
    pub(crate) writable: bool,

    /// The descriptor reported an error condition.
    pub(crate) error: bool,
}

impl Event {
    /// Creates an event with no readiness bits set.
    pub(crate) fn new(token: u64) -> Self {
        Self {
            token,
            readable: false,
            writable: false,
            error: false,
        }
    }

    /// Merges the readiness bits of `other` into this event.
    pub(crate) fn merge(&mut self, other: &Event) {
        self.readable |= other.readable;
        self.writable |= other.writable;
        self.error |= other.error;
    }
}

/// Appends `event` to `events`, merging it with an existing entry for the
/// same token.
pub(crate) fn push_merged(events: &mut Vec<Event>, event: Event) {
    if let Some(existing) = events.iter_mut().find(|e| e.token == event.token) {
        existing.merge(&event);
    } else {
        events.push(event);
    }
}
