use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Flag that is set while a paywall is presented. Clones share the flag.
///
/// Each [`Client`](crate::Client) creates its own unless one is passed through
/// [`ClientConfig::single_flight`](crate::ClientConfig::single_flight). Applications that run more
/// than one client must share a single instance to keep presentation single-flight process-wide.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    presenting: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> SingleFlight {
        SingleFlight::default()
    }

    /// Returns `true` while a paywall is presented.
    pub fn is_presenting(&self) -> bool {
        self.presenting.load(Ordering::Acquire)
    }

    /// Claim the flag. Returns `None` if another presentation holds it.
    pub(crate) fn try_acquire(&self) -> Option<SingleFlightGuard> {
        self.presenting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SingleFlightGuard {
                presenting: Arc::clone(&self.presenting),
            })
    }
}

/// Releases the flag on drop, including when the owning pipeline is cancelled.
#[derive(Debug)]
pub(crate) struct SingleFlightGuard {
    presenting: Arc<AtomicBool>,
}

impl Drop for SingleFlightGuard {
    fn drop(&mut self) {
        self.presenting.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::SingleFlight;

    #[test]
    fn only_one_guard_at_a_time() {
        let flight = SingleFlight::new();
        assert!(!flight.is_presenting());

        let guard = flight.try_acquire().unwrap();
        assert!(flight.is_presenting());
        assert!(flight.clone().try_acquire().is_none());

        drop(guard);
        assert!(!flight.is_presenting());
        assert!(flight.try_acquire().is_some());
    }
}
