use abi::TimeMs;

use crate::space::Space;
use crate::TIMER_MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerState {
    /// Created or explicitly stopped.
    Stopped,
    /// Counting; becomes `Finished` on the tick sweep that sees the
    /// interval elapsed.
    Started,
    /// Stays finished until started again.
    Finished,
}

#[derive(Debug)]
pub(crate) struct Timer {
    start: TimeMs,
    interval: TimeMs,
    state: TimerState,
}

/// One-shot millisecond timers, swept from the system tick.
#[derive(Debug, Default)]
pub(crate) struct TimerTable {
    data: Space<Timer, TIMER_MAX>,
}

impl TimerTable {
    pub fn create(&mut self, now: TimeMs, interval: TimeMs) -> Option<usize> {
        self.data.push(Timer {
            start: now,
            interval,
            state: TimerState::Stopped,
        })
    }

    pub fn destroy(&mut self, id: usize) {
        self.data.remove(id);
    }

    /// Start (or restart) counting from `now`.
    pub fn start(&mut self, id: usize, now: TimeMs) {
        if let Some(timer) = self.data.get_mut(id) {
            timer.start = now;
            timer.state = TimerState::Started;
        }
    }

    pub fn stop(&mut self, id: usize) {
        if let Some(timer) = self.data.get_mut(id) {
            timer.state = TimerState::Stopped;
        }
    }

    pub fn state(&self, id: usize) -> Option<TimerState> {
        self.data.get(id).map(|t| t.state)
    }

    /// Tick sweep: finish every started timer whose interval has elapsed.
    pub fn tick(&mut self, now: TimeMs) {
        for (_, timer) in self.data.entries_mut() {
            if timer.state == TimerState::Started
                && now.wrapping_sub(timer.start) > timer.interval
            {
                timer.state = TimerState::Finished;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_finishes_after_interval() {
        let mut timers = TimerTable::default();
        let id = timers.create(0, 100).unwrap();
        assert_eq!(timers.state(id), Some(TimerState::Stopped));

        timers.start(id, 0);
        timers.tick(100);
        assert_eq!(timers.state(id), Some(TimerState::Started));
        timers.tick(101);
        assert_eq!(timers.state(id), Some(TimerState::Finished));
        // Finished is sticky until restarted.
        timers.tick(500);
        assert_eq!(timers.state(id), Some(TimerState::Finished));
    }

    #[test]
    fn stopped_timer_never_finishes() {
        let mut timers = TimerTable::default();
        let id = timers.create(0, 10).unwrap();
        timers.tick(1000);
        assert_eq!(timers.state(id), Some(TimerState::Stopped));
    }

    #[test]
    fn restart_counts_from_new_origin() {
        let mut timers = TimerTable::default();
        let id = timers.create(0, 50).unwrap();
        timers.start(id, 0);
        timers.tick(60);
        assert_eq!(timers.state(id), Some(TimerState::Finished));

        timers.start(id, 60);
        timers.tick(100);
        assert_eq!(timers.state(id), Some(TimerState::Started));
        timers.tick(111);
        assert_eq!(timers.state(id), Some(TimerState::Finished));
    }

    #[test]
    fn sweep_is_wrap_safe() {
        let mut timers = TimerTable::default();
        let id = timers.create(u32::MAX - 5, 10).unwrap();
        timers.start(id, u32::MAX - 5);
        timers.tick(4); // 10 ms later, counter wrapped
        assert_eq!(timers.state(id), Some(TimerState::Started));
        timers.tick(5);
        assert_eq!(timers.state(id), Some(TimerState::Finished));
    }

    #[test]
    fn destroy_frees_the_slot() {
        let mut timers = TimerTable::default();
        let id = timers.create(0, 1).unwrap();
        timers.destroy(id);
        assert_eq!(timers.state(id), None);
        assert_eq!(timers.create(0, 1), Some(id));
    }
}
