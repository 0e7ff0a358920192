use super::wake::WakeFlags;

/// The guest-visible side of a pipe.
///
/// The pipe engine holds only a weak reference to this object and drops
/// it as soon as the guest closes the pipe or the host side fails, so
/// neither method is ever called after that point.
///
/// Implementations are invoked from inside the engine's event dispatch
/// and must not call back into the engine synchronously. Raising a guest
/// interrupt or recording the flags for the next register read is the
/// expected behaviour.
pub trait GuestPipe {
    /// Requested readiness occurred. `flags` carries every direction
    /// observed since the guest last re-armed.
    fn wake(&self, flags: WakeFlags);

    /// The host side of the pipe failed or was closed. The guest is
    /// expected to acknowledge by closing its pipe.
    fn signal_closed(&self);
}
