use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Slots {
    in_flight: usize,
    peak: usize,
}

#[derive(Debug)]
struct Shared {
    max: usize,
    slots: Mutex<Slots>,
    // Notified whenever a permit is dropped.
    released: Condvar,
}

/// Bounded-concurrency gate for probe units.
///
/// [`Limiter::acquire`] hands out at most `max` outstanding [`Permit`]s and
/// blocks the caller while the limit is reached. [`Limiter::wait`] is the
/// join barrier: it returns once every permit handed out so far has been
/// dropped.
#[derive(Debug, Clone)]
pub struct Limiter {
    shared: Arc<Shared>,
}

impl Limiter {
    /// `max` is clamped to at least one permit.
    pub fn new(max: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                max: max.max(1),
                slots: Mutex::new(Slots::default()),
                released: Condvar::new(),
            }),
        }
    }

    #[inline]
    pub fn max(&self) -> usize {
        self.shared.max
    }

    pub fn acquire(&self) -> Permit {
        let mut slots = self.shared.slots.lock();
        while slots.in_flight >= self.shared.max {
            self.shared.released.wait(&mut slots);
        }

        slots.in_flight += 1;
        slots.peak = slots.peak.max(slots.in_flight);

        Permit {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn wait(&self) {
        let mut slots = self.shared.slots.lock();
        while slots.in_flight > 0 {
            self.shared.released.wait(&mut slots);
        }
    }

    /// Permits currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.shared.slots.lock().in_flight
    }

    /// Highest number of permits ever outstanding at once.
    pub fn peak(&self) -> usize {
        self.shared.slots.lock().peak
    }
}

/// A slot held by one probe unit. Dropping it releases the slot, which also
/// happens while unwinding from a panic.
#[derive(Debug)]
pub struct Permit {
    shared: Arc<Shared>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut slots = self.shared.slots.lock();
        slots.in_flight -= 1;
        drop(slots);

        // Both blocked acquirers and the join barrier wait on this.
        self.shared.released.notify_all();
    }
}
