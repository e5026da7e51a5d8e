//! Doorbell ring state, shared between the application and the GATT
//! characteristic that exposes it.
//!
//! The value is the remaining ring time in milliseconds, or `-1` when no
//! ring is ongoing.  Writers get back the wire payload only when the
//! value actually changed, so subscribers are not notified redundantly.

use core::sync::atomic::{AtomicI32, Ordering};

pub const NOT_ONGOING: i32 = -1;

pub struct DoorbellRing {
    millis: AtomicI32,
}

impl DoorbellRing {
    pub const fn new() -> Self {
        Self {
            millis: AtomicI32::new(NOT_ONGOING),
        }
    }

    /// Store a new ring value.  Returns the little-endian payload to
    /// notify with if the value changed, `None` otherwise.
    pub fn write(&self, millis: i32) -> Option<[u8; 4]> {
        let previous = self.millis.swap(millis, Ordering::AcqRel);
        if previous == millis {
            None
        } else {
            Some(millis.to_le_bytes())
        }
    }

    pub fn read(&self) -> i32 {
        self.millis.load(Ordering::Acquire)
    }

    /// Current value as the characteristic's wire payload.
    pub fn read_le(&self) -> [u8; 4] {
        self.read().to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_ongoing() {
        let ring = DoorbellRing::new();
        assert_eq!(ring.read(), NOT_ONGOING);
        assert_eq!(ring.read_le(), (-1i32).to_le_bytes());
    }

    #[test]
    fn change_yields_notification_payload() {
        let ring = DoorbellRing::new();
        assert_eq!(ring.write(5000), Some(5000i32.to_le_bytes()));
        assert_eq!(ring.read(), 5000);
    }

    #[test]
    fn unchanged_value_is_silent() {
        let ring = DoorbellRing::new();
        assert_eq!(ring.write(NOT_ONGOING), None);
        assert_eq!(ring.write(2500), Some(2500i32.to_le_bytes()));
        assert_eq!(ring.write(2500), None);
        assert_eq!(ring.write(NOT_ONGOING), Some((-1i32).to_le_bytes()));
    }
}
