#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(feature = "cortex_m", feature(naked_functions))]
#![allow(dead_code)]

//! Preemptive, priority-based real-time kernel core for single-core
//! ARMv7-M targets.
//!
//! A fixed number of tasks is multiplexed onto one CPU: ready tasks sit in
//! per-priority round-robin rings, blocked tasks in a wait list with their
//! wake conditions, and the millisecond tick drives timers, wake-up checks
//! and the round-robin quantum. All storage is static; there is no heap.
//!
//! The CPU-specific part lives behind [`arch`]: two software traps
//! ([`abi::SyscallId`]) perform the actual register save/load, and the
//! same code runs on the host against the dummy port for testing.

pub use abi;

pub mod api;
pub mod arch;

mod event;
mod klog;
mod lock;
mod queue;
mod ring;
mod scheduler;
mod space;
mod systick;
mod task;
mod timer;
mod wait;

#[cfg(feature = "cortex_m")]
mod defmt_log;


use abi::{Handle, Priority, TaskId, TimeMs, WaitResult};

use event::EventTable;
use lock::KernelLock;
use queue::QueueTable;
use scheduler::Scheduler;
use systick::SystemTimer;
use task::TaskTable;
use timer::TimerTable;

pub use queue::QueueStorage;
pub use task::TaskRoutine;

/// Maximum number of live tasks, idle task included.
pub const TASK_MAX: usize = 10;
/// Maximum number of live events. The kernel itself creates events for
/// user critical sections, so this must not be zero.
pub const EVENT_MAX: usize = 8;
/// Maximum number of live software timers.
pub const TIMER_MAX: usize = 8;
/// Maximum number of live static queues.
pub const QUEUE_MAX: usize = 4;
/// Per-task stack size in machine words. Too small a value overflows the
/// stack on deep call chains or low optimization levels.
pub const STACK_SIZE_WORDS: usize = 256;
/// Maximum number of handles one wait can block on.
pub const MAX_INPUT_SIGNALS: usize = 8;
/// Round-robin timeslice within one priority.
pub const CONTEXT_SWITCH_INTERVAL_MS: TimeMs = 10;
/// Core clock driving the tick source.
pub const CORE_CLOCK_HZ: u32 = 72_000_000;

#[derive(Debug, PartialEq, Eq)]
pub enum KernelError {
    TooManyTasks,
    TooManyEvents,
    TooManyTimers,
    TooManyQueues,
    ReadyListFull,
    WaitListFull,
}

/// The whole kernel state, threaded by reference into every operation.
/// Exactly one lives in a port-owned static once [`api::init`] has run;
/// tests build their own.
pub struct Kernel {
    pub(crate) tasks: TaskTable,
    pub(crate) scheduler: Scheduler,
    pub(crate) events: EventTable,
    pub(crate) timers: TimerTable,
    pub(crate) queues: QueueTable,
    pub(crate) time: SystemTimer,
    pub(crate) lock: KernelLock,
    pub(crate) started: bool,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            tasks: TaskTable::default(),
            scheduler: Scheduler::default(),
            events: EventTable::default(),
            timers: TimerTable::default(),
            queues: QueueTable::default(),
            time: SystemTimer::default(),
            lock: KernelLock::new(),
            started: false,
        }
    }

    /// Create a task and enter it into the scheduler. The returned flag
    /// asks the caller to request a context switch: the new task preempts
    /// the running one.
    pub(crate) fn create_task(
        &mut self,
        trampoline: usize,
        routine: TaskRoutine,
        priority: Priority,
        parameter: *mut (),
        suspended: bool,
    ) -> Result<(TaskId, bool), KernelError> {
        let id = self
            .tasks
            .create(trampoline, routine, priority, parameter, suspended)
            .ok_or(KernelError::TooManyTasks)?;

        let entered = if suspended {
            self.scheduler.add_suspended(&mut self.tasks, id)
        } else {
            self.scheduler.add_ready(&mut self.tasks, id)
        };
        if !entered {
            self.tasks.destroy(id);
            return Err(KernelError::ReadyListFull);
        }

        let current = self.scheduler.current_task_id();
        let preempts = !suspended
            && self.started
            && self
                .tasks
                .priority(current)
                .map_or(false, |current_priority| priority.preempts(current_priority));
        Ok((id, preempts))
    }

    pub(crate) fn create_event(
        &mut self,
        manual_reset: bool,
        name: Option<&'static str>,
    ) -> Result<usize, KernelError> {
        self.events
            .create(manual_reset, name)
            .ok_or(KernelError::TooManyEvents)
    }

    pub(crate) fn create_timer(&mut self, interval: TimeMs) -> Result<usize, KernelError> {
        let now = self.time.time_ms();
        self.timers
            .create(now, interval)
            .ok_or(KernelError::TooManyTimers)
    }

    pub(crate) fn create_queue(
        &mut self,
        capacity: usize,
        elem_size: usize,
        buffer: *mut u8,
        name: Option<&'static str>,
    ) -> Result<usize, KernelError> {
        self.queues
            .create(capacity, elem_size, buffer, name)
            .ok_or(KernelError::TooManyQueues)
    }

    /// Park the running task on the wait list.
    pub(crate) fn sleep_current(&mut self, interval: TimeMs) -> bool {
        let now = self.time.time_ms();
        let current = self.scheduler.current_task_id();
        self.scheduler
            .set_sleep(&mut self.tasks, current, interval, now)
    }

    pub(crate) fn wait_current_for_objects(
        &mut self,
        signals: &[Handle],
        wait_all: bool,
        wait_forever: bool,
        timeout: TimeMs,
    ) -> bool {
        let now = self.time.time_ms();
        let current = self.scheduler.current_task_id();
        self.scheduler.set_wait_for_objects(
            &mut self.tasks,
            current,
            signals,
            wait_all,
            wait_forever,
            timeout,
            now,
        )
    }

    /// Wait outcome of the running task, read back after it resumes.
    pub(crate) fn current_wait_outcome(&self) -> (WaitResult, usize) {
        let current = self.scheduler.current_task_id();
        (
            self.tasks
                .wait_result(current)
                .unwrap_or(WaitResult::WaitFailed),
            self.tasks.last_signal_index(current).unwrap_or(0),
        )
    }

    /// Millisecond tick: advance timers, wake fulfilled waits and rotate
    /// the round-robin cursor once per quantum. While ordinary code holds
    /// the kernel lock only time advances; the scheduling decision is
    /// deferred to the next tick.
    ///
    /// Returns true when the port must perform a context switch.
    pub(crate) fn tick(&mut self) -> bool {
        let mut execute_context_switch = false;

        if !self.lock.is_locked() {
            let now = self.time.time_ms();

            self.timers.tick(now);
            self.scheduler.check_wait_conditions(
                &mut self.tasks,
                &self.timers,
                &mut self.events,
                &self.queues,
                now,
            );

            if self.time.interval_elapsed() {
                let current = self.scheduler.current_task_id();
                if let Some(next) = self.scheduler.get_next_task(&mut self.tasks) {
                    if next != current {
                        self.store_context(current);
                        self.load_context(next);
                        execute_context_switch = true;
                    }
                }
            }
        }

        self.time.increment();
        execute_context_switch
    }

    /// Trap glue for [`abi::SyscallId::ExecuteContextSwitch`]: pick who
    /// runs (state changes already decided it), point the port at the two
    /// register blocks, and release the lock taken by the facade
    /// operation that requested the trap.
    pub(crate) fn switch_context(&mut self) {
        let previous = self.scheduler.current_task_id();
        match self.scheduler.get_current_task(&mut self.tasks) {
            Some(next) => {
                self.store_context(previous);
                self.load_context(next);
            }
            None => arch::fatal(),
        }
        self.lock.leave();
    }

    /// Trap glue for [`abi::SyscallId::LoadNextTask`]: like
    /// [`Self::switch_context`] but with no previous context to save.
    /// Used at start-up and when the running task terminated itself.
    pub(crate) fn load_next_task(&mut self) {
        match self.scheduler.get_current_task(&mut self.tasks) {
            Some(next) => self.load_context(next),
            None => arch::fatal(),
        }
        self.lock.leave();
    }

    /// Record the running task's stack pointer and hand its register
    /// block to the port.
    fn store_context(&mut self, id: TaskId) {
        self.tasks.set_sp(id, arch::sp());
        if let Some(context) = self.tasks.context_ptr(id) {
            arch::set_current_context(context);
        }
    }

    /// Hand the next task's register block and stack pointer to the port.
    fn load_context(&mut self, id: TaskId) {
        if let Some(context) = self.tasks.context_ptr(id) {
            arch::set_next_context(context);
        }
        if let Some(sp) = self.tasks.sp(id) {
            arch::set_sp(sp);
        }
    }
}
