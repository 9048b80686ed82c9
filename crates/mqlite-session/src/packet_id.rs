//! Message identifier allocation.
//!
//! Identifiers are 16-bit non-zero values used for QoS 1 PUBLISH, SUBSCRIBE
//! and UNSUBSCRIBE packets. One counter per session, wrapping 65535 -> 1.
//! Outstanding ids are not tracked: the space is large compared to the number
//! of requests in flight, and the correlator handles the rare collision.

/// Monotonic packet identifier counter.
#[derive(Debug, Default)]
pub struct MessageIdAllocator {
    /// Last id handed out (0 before the first allocation).
    current: u16,
}

impl MessageIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next identifier, skipping 0.
    pub fn next(&mut self) -> u16 {
        self.current = self.current.wrapping_add(1);
        if self.current == 0 {
            self.current = 1;
        }
        self.current
    }

    /// Last identifier issued, if any.
    #[cfg(test)]
    pub(crate) fn last(&self) -> Option<u16> {
        (self.current != 0).then_some(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_allocation() {
        let mut ids = MessageIdAllocator::new();
        assert_eq!(ids.last(), None);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
        assert_eq!(ids.last(), Some(3));
    }

    #[test]
    fn test_skips_zero() {
        let mut ids = MessageIdAllocator { current: 65534 };
        assert_eq!(ids.next(), 65535);
        assert_eq!(ids.next(), 1); // Skipped 0
        assert_eq!(ids.next(), 2);
    }

    #[test]
    fn test_full_cycle_is_strictly_increasing() {
        let mut ids = MessageIdAllocator::new();
        let mut prev = 0u16;
        for _ in 0..u16::MAX {
            let id = ids.next();
            assert!(id > prev);
            prev = id;
        }
        assert_eq!(prev, u16::MAX);
        assert_eq!(ids.next(), 1);
    }
}
