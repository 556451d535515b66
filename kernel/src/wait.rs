use abi::{Handle, ObjectKind, TaskId, TimeMs, WaitResult};
use heapless::Vec;

use crate::event::EventTable;
use crate::queue::QueueTable;
use crate::space::Space;
use crate::timer::{TimerState, TimerTable};
use crate::{MAX_INPUT_SIGNALS, TASK_MAX};

/// Why a waiting task is blocked and when to wake it.
#[derive(Debug)]
pub(crate) enum Conditions {
    Sleep {
        start: TimeMs,
        interval: TimeMs,
    },
    WaitForObjects {
        signals: Vec<Handle, MAX_INPUT_SIGNALS>,
        /// All signals must be set, instead of any one of them.
        wait_all: bool,
        /// No timeout applies.
        wait_forever: bool,
        start: TimeMs,
        timeout: TimeMs,
    },
}

#[derive(Debug)]
pub(crate) struct WaitItem {
    pub(crate) id: TaskId,
    pub(crate) conditions: Conditions,
}

/// One wait item per waiting task, allocated when the task blocks and
/// freed when it wakes.
#[derive(Debug, Default)]
pub(crate) struct WaitList {
    items: Space<WaitItem, TASK_MAX>,
}

impl WaitList {
    pub fn add_sleep(&mut self, id: TaskId, interval: TimeMs, now: TimeMs) -> bool {
        self.items
            .push(WaitItem {
                id,
                conditions: Conditions::Sleep {
                    start: now,
                    interval,
                },
            })
            .is_some()
    }

    pub fn add_wait_for_objects(
        &mut self,
        id: TaskId,
        signals: &[Handle],
        wait_all: bool,
        wait_forever: bool,
        timeout: TimeMs,
        now: TimeMs,
    ) -> bool {
        if signals.is_empty() {
            return false;
        }
        let signals = match Vec::from_slice(signals) {
            Ok(signals) => signals,
            Err(()) => return false,
        };
        self.items
            .push(WaitItem {
                id,
                conditions: Conditions::WaitForObjects {
                    signals,
                    wait_all,
                    wait_forever,
                    start: now,
                    timeout,
                },
            })
            .is_some()
    }

    /// Drop the wait item of `id`, if any.
    pub fn remove(&mut self, id: TaskId) {
        let found = self
            .items
            .entries()
            .find(|(_, item)| item.id == id)
            .map(|(i, _)| i);
        if let Some(i) = found {
            self.items.remove(i);
        }
    }

    pub fn get(&self, slot: usize) -> Option<&WaitItem> {
        self.items.get(slot)
    }

    pub fn free(&mut self, slot: usize) {
        self.items.remove(slot);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Is the object behind `handle` in its signaled state? `None` marks an
/// invalid handle: an unknown kind, a task handle, or a stale index.
fn test_condition(
    handle: Handle,
    timers: &TimerTable,
    events: &EventTable,
    queues: &QueueTable,
) -> Option<bool> {
    match handle.kind()? {
        ObjectKind::Event => events.is_signaled(handle.index()),
        ObjectKind::Timer => timers
            .state(handle.index())
            .map(|state| state == TimerState::Finished),
        ObjectKind::Queue => queues.size(handle.index()).map(|size| size > 0),
        ObjectKind::Task => None,
    }
}

/// Consume the signal as part of waking: auto-reset events are reset,
/// every other kind is left alone.
fn reset_signal(handle: Handle, events: &mut EventTable) {
    if handle.kind() == Some(ObjectKind::Event) {
        events.consume(handle.index());
    }
}

/// Evaluate `conditions` at time `now`. `Some((result, index))` means the
/// task wakes with that wait result; `index` is the position of the signal
/// that fired (any-mode only).
pub(crate) fn check(
    conditions: &Conditions,
    timers: &TimerTable,
    events: &mut EventTable,
    queues: &QueueTable,
    now: TimeMs,
) -> Option<(WaitResult, usize)> {
    match conditions {
        Conditions::Sleep { start, interval } => {
            if now.wrapping_sub(*start) > *interval {
                return Some((WaitResult::ObjectSet, 0));
            }
            None
        }
        Conditions::WaitForObjects {
            signals,
            wait_all,
            wait_forever,
            start,
            timeout,
        } => {
            // Timeout wins over the signal check.
            if !wait_forever && now.wrapping_sub(*start) > *timeout {
                return Some((WaitResult::TimeoutOccurred, 0));
            }

            if *wait_all {
                for signal in signals {
                    match test_condition(*signal, timers, events, queues) {
                        None => return Some((WaitResult::InvalidHandle, 0)),
                        Some(false) => return None,
                        Some(true) => {}
                    }
                }
                for signal in signals {
                    reset_signal(*signal, events);
                }
                Some((WaitResult::ObjectSet, 0))
            } else {
                for (i, signal) in signals.iter().enumerate() {
                    match test_condition(*signal, timers, events, queues) {
                        None => return Some((WaitResult::InvalidHandle, 0)),
                        Some(true) => {
                            reset_signal(*signal, events);
                            return Some((WaitResult::ObjectSet, i));
                        }
                        Some(false) => {}
                    }
                }
                None
            }
        }
    }
}
