use bitflags::bitflags;

bitflags! {
    /// Readiness bits exchanged with the guest.
    ///
    /// Values follow the guest pipe ABI.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
    pub struct WakeFlags: u32 {
        /// The pipe was closed by the host.
        const CLOSED = 1 << 0;
        /// The pipe can be read without blocking.
        const READ = 1 << 1;
        /// The pipe can be written without blocking.
        const WRITE = 1 << 2;
    }
}

/// Tracks what the guest wants to be woken for and what readiness has
/// been seen since it last asked.
///
/// One delivered wake satisfies the whole want for a direction: the bit
/// is removed from `wanted` and only comes back when the guest re-arms.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Notifier {
    wanted: WakeFlags,
    observed: WakeFlags,
}

impl Notifier {
    /// Records readiness in `direction`.
    ///
    /// Returns the mask to deliver to the guest when the direction was
    /// wanted; the delivered mask carries every observed bit.
    pub(crate) fn observe(&mut self, direction: WakeFlags) -> Option<WakeFlags> {
        self.observed |= direction;

        if self.wanted.intersects(direction) {
            self.wanted.remove(direction);
            Some(self.observed)
        } else {
            None
        }
    }

    /// Re-arms the guest's interest in `flags`.
    ///
    /// Observations for those directions are forgotten so a stale
    /// readiness never satisfies a fresh request.
    pub(crate) fn arm(&mut self, flags: WakeFlags) {
        let flags = flags & (WakeFlags::READ | WakeFlags::WRITE);

        self.wanted |= flags;
        self.observed.remove(flags);
    }

    pub(crate) fn wanted(&self) -> WakeFlags {
        self.wanted
    }

    pub(crate) fn observed(&self) -> WakeFlags {
        self.observed
    }

    /// Drops every pending want.
    pub(crate) fn disarm(&mut self) {
        self.wanted = WakeFlags::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wanted_direction_delivers_once() {
        let mut notifier = Notifier::default();
        notifier.arm(WakeFlags::READ);

        assert_eq!(notifier.observe(WakeFlags::READ), Some(WakeFlags::READ));
        assert_eq!(notifier.observe(WakeFlags::READ), None);
        assert_eq!(notifier.observed(), WakeFlags::READ);
    }

    #[test]
    fn test_delivered_mask_carries_all_observations() {
        let mut notifier = Notifier::default();
        notifier.arm(WakeFlags::READ);

        assert_eq!(notifier.observe(WakeFlags::WRITE), None);
        assert_eq!(
            notifier.observe(WakeFlags::READ),
            Some(WakeFlags::READ | WakeFlags::WRITE)
        );
    }

    #[test]
    fn test_rearm_forgets_stale_observation() {
        let mut notifier = Notifier::default();
        notifier.arm(WakeFlags::READ);
        notifier.observe(WakeFlags::READ);

        notifier.arm(WakeFlags::READ);

        assert!(notifier.observed().is_empty());
        assert_eq!(notifier.wanted(), WakeFlags::READ);
    }

    #[test]
    fn test_arm_ignores_closed_bit() {
        let mut notifier = Notifier::default();
        notifier.arm(WakeFlags::CLOSED | WakeFlags::WRITE);

        assert_eq!(notifier.wanted(), WakeFlags::WRITE);
    }
}
