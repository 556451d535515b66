use core::sync::atomic::{AtomicU32, Ordering};

use abi::TimeMs;

use crate::CONTEXT_SWITCH_INTERVAL_MS;

/// Free-running millisecond counter plus the round-robin quantum mark.
///
/// The counter wraps modulo 2^32; every comparison uses wrapping
/// subtraction and so stays correct for intervals below 2^31 ms. Reads are
/// a single atomic load so `time_ms` needs no lock.
#[derive(Debug, Default)]
pub(crate) struct SystemTimer {
    current: AtomicU32,
    quantum_mark: TimeMs,
}

impl SystemTimer {
    pub fn time_ms(&self) -> TimeMs {
        self.current.load(Ordering::Relaxed)
    }

    pub fn increment(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    /// True once per elapsed round-robin quantum; advances the mark as a
    /// side effect.
    pub fn interval_elapsed(&mut self) -> bool {
        let now = self.time_ms();
        if now.wrapping_sub(self.quantum_mark) > CONTEXT_SWITCH_INTERVAL_MS {
            self.quantum_mark = now;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::SystemTimer;
    use crate::CONTEXT_SWITCH_INTERVAL_MS;

    #[test]
    fn interval_elapses_once_per_quantum() {
        let mut timer = SystemTimer::default();
        let mut elapsed = 0;
        for _ in 0..=(CONTEXT_SWITCH_INTERVAL_MS * 3) {
            timer.increment();
            if timer.interval_elapsed() {
                elapsed += 1;
            }
        }
        assert_eq!(elapsed, 2);
    }

    #[test]
    fn interval_survives_counter_wraparound() {
        let mut timer = SystemTimer::default();
        timer.current = (u32::MAX - 2).into();
        timer.quantum_mark = u32::MAX - 2;
        for _ in 0..CONTEXT_SWITCH_INTERVAL_MS {
            timer.increment();
            assert!(!timer.interval_elapsed());
        }
        timer.increment();
        assert!(timer.interval_elapsed());
    }
}
