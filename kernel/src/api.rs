//! User-visible kernel operations over the port-owned kernel instance.
//!
//! Every operation that touches scheduler state brackets itself with the
//! kernel lock; an operation that requests a context switch leaves the
//! lock held and the trap glue releases it after the register save/load.
//! None of these may be called from interrupt handlers unless the item
//! says so.

use core::ptr;

use abi::{Handle, ObjectKind, Priority, SyscallId, TaskId, TimeMs, WaitResult};

use crate::arch;
use crate::klog::klog;
use crate::task::TaskRoutine;
use crate::{CONTEXT_SWITCH_INTERVAL_MS, CORE_CLOCK_HZ, MAX_INPUT_SIGNALS};

/// Initialize the kernel and install the idle task. Precondition for
/// every other operation; call exactly once.
pub fn init() {
    let kernel = unsafe { arch::init_kernel() };
    arch::init();

    let idle_created = kernel.create_task(
        task_trampoline as usize,
        idle_routine,
        Priority::Idle,
        ptr::null_mut(),
        false,
    );
    if idle_created.is_err() {
        arch::fatal();
    }
    klog!("kernel initialized");
}

/// Hand the CPU over to the scheduler. With no user tasks created this
/// runs the idle task.
pub fn start() -> ! {
    let kernel = unsafe { arch::kernel() };
    if !kernel.started {
        kernel.lock.enter();
        kernel.started = true;
        arch::start();
        arch::syscall(SyscallId::LoadNextTask);
    }
    // Not reached once the port loads the first task.
    loop {
        arch::wait_for_interrupt();
    }
}

/// Milliseconds since the kernel started. Single atomic read, callable
/// from anywhere.
pub fn time_ms() -> TimeMs {
    let kernel = unsafe { arch::kernel() };
    kernel.time.time_ms()
}

pub fn core_frequency_hz() -> u32 {
    CORE_CLOCK_HZ
}

/// Idle task body. Must always be dispatchable or scheduling has nothing
/// to fall back to.
fn idle_routine(_: *mut ()) {
    loop {
        arch::wait_for_interrupt();
    }
}

/// Every task starts here via its synthetic return frame: fetch the entry
/// point and parameter from the descriptor, run it, and tear the task
/// down when it returns.
fn task_trampoline() {
    let kernel = unsafe { arch::kernel() };

    kernel.lock.enter();
    let id = kernel.scheduler.current_task_id();
    let routine = kernel.tasks.routine(id);
    let parameter = kernel.tasks.parameter(id);
    kernel.lock.leave();

    if let (Some(routine), Some(parameter)) = (routine, parameter) {
        routine(parameter);
    }

    terminate_task(id);
}

/// Remove a task from the scheduler and free its slot. Rescheduled in
/// place when the task is killing itself.
fn terminate_task(id: TaskId) {
    let kernel = unsafe { arch::kernel() };

    kernel.lock.enter();
    let current = kernel.scheduler.current_task_id();
    kernel.scheduler.remove_task(&mut kernel.tasks, id);
    kernel.tasks.destroy(id);
    klog!("task {=usize} terminated", *id);

    if current == id && kernel.started {
        arch::syscall(SyscallId::LoadNextTask);
    } else {
        kernel.lock.leave();
    }
}

pub mod task {
    use super::*;

    /// Create a task. Works both before `start()` and from running
    /// tasks; a created task of higher priority than the caller preempts
    /// it immediately.
    pub fn create(
        routine: TaskRoutine,
        priority: Priority,
        handle: Option<&mut Handle>,
        parameter: *mut (),
        suspended: bool,
    ) -> bool {
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        match kernel.create_task(
            super::task_trampoline as usize,
            routine,
            priority,
            parameter,
            suspended,
        ) {
            Ok((id, preempts)) => {
                if let Some(handle) = handle {
                    *handle = Handle::create(ObjectKind::Task, *id);
                }
                if preempts {
                    arch::syscall(SyscallId::ExecuteContextSwitch);
                } else {
                    kernel.lock.leave();
                }
                true
            }
            Err(_) => {
                kernel.lock.leave();
                false
            }
        }
    }

    /// Handle of the running task.
    pub fn current() -> Handle {
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        let id = kernel.scheduler.current_task_id();
        kernel.lock.leave();
        Handle::create(ObjectKind::Task, *id)
    }

    /// Brute-force removal. Terminating a task that owns kernel objects
    /// or sits inside a user critical section leaves those dangling.
    pub fn terminate(handle: Handle) {
        if handle.kind() != Some(ObjectKind::Task) {
            return;
        }
        super::terminate_task(TaskId(handle.index()));
    }

    /// Suspend a task; a task may suspend itself. No effect before
    /// `start()`.
    pub fn suspend(handle: Handle) {
        if handle.kind() != Some(ObjectKind::Task) {
            return;
        }
        let kernel = unsafe { arch::kernel() };
        if !kernel.started {
            return;
        }

        kernel.lock.enter();
        let id = TaskId(handle.index());
        kernel.scheduler.set_suspended(&mut kernel.tasks, id);

        // Reschedule in case the task suspended itself.
        if kernel.scheduler.current_task_id() == id {
            arch::syscall(SyscallId::ExecuteContextSwitch);
        } else {
            kernel.lock.leave();
        }
    }

    /// Resume a suspended task. Resuming self, a ready task or a waiting
    /// task does nothing.
    pub fn resume(handle: Handle) {
        if handle.kind() != Some(ObjectKind::Task) {
            return;
        }
        let kernel = unsafe { arch::kernel() };
        if !kernel.started {
            return;
        }

        kernel.lock.enter();
        let id = TaskId(handle.index());
        let current = kernel.scheduler.current_task_id();
        if id == current {
            kernel.lock.leave();
            return;
        }
        if !kernel.scheduler.resume_suspended(&mut kernel.tasks, id) {
            kernel.lock.leave();
            return;
        }

        let resumed = kernel.tasks.priority(id);
        let running = kernel.tasks.priority(current);
        let preempts = match (resumed, running) {
            (Some(resumed), Some(running)) => resumed.preempts(running),
            _ => false,
        };
        if preempts {
            arch::syscall(SyscallId::ExecuteContextSwitch);
        } else {
            kernel.lock.leave();
        }
    }

    /// Block the calling task for `interval` milliseconds. Intervals up
    /// to one round-robin quantum are not observable and skipped.
    pub fn sleep(interval: TimeMs) {
        if interval <= CONTEXT_SWITCH_INTERVAL_MS {
            return;
        }
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        kernel.sleep_current(interval);
        arch::syscall(SyscallId::ExecuteContextSwitch);
    }
}

pub mod event {
    use super::*;

    pub fn create(handle: &mut Handle, manual_reset: bool, name: Option<&'static str>) -> bool {
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        let created = kernel.create_event(manual_reset, name);
        kernel.lock.leave();
        match created {
            Ok(id) => {
                *handle = Handle::create(ObjectKind::Event, id);
                true
            }
            Err(_) => false,
        }
    }

    /// Look up an event created with a name.
    pub fn open(handle: &mut Handle, name: &str) -> bool {
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        let found = kernel.events.open(name);
        kernel.lock.leave();
        match found {
            Some(id) => {
                *handle = Handle::create(ObjectKind::Event, id);
                true
            }
            None => false,
        }
    }

    pub fn destroy(handle: Handle) {
        if handle.kind() != Some(ObjectKind::Event) {
            return;
        }
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        kernel.events.destroy(handle.index());
        kernel.lock.leave();
    }

    pub fn set(handle: Handle) {
        if handle.kind() != Some(ObjectKind::Event) {
            return;
        }
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        kernel.events.set(handle.index());
        kernel.lock.leave();
    }

    /// Interrupt-handler variant of [`set`]: serializes through the
    /// interrupt mask instead of the kernel lock.
    pub fn set_from_isr(handle: Handle) {
        if handle.kind() != Some(ObjectKind::Event) {
            return;
        }
        let kernel = unsafe { arch::kernel() };
        kernel.events.set(handle.index());
    }

    pub fn reset(handle: Handle) {
        if handle.kind() != Some(ObjectKind::Event) {
            return;
        }
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        kernel.events.reset(handle.index());
        kernel.lock.leave();
    }
}

pub mod timer {
    use super::*;

    /// One-shot timer; created stopped.
    pub fn create(handle: &mut Handle, interval: TimeMs) -> bool {
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        let created = kernel.create_timer(interval);
        kernel.lock.leave();
        match created {
            Ok(id) => {
                *handle = Handle::create(ObjectKind::Timer, id);
                true
            }
            Err(_) => false,
        }
    }

    pub fn destroy(handle: Handle) {
        if handle.kind() != Some(ObjectKind::Timer) {
            return;
        }
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        kernel.timers.destroy(handle.index());
        kernel.lock.leave();
    }

    /// Start, or restart, counting from now.
    pub fn start(handle: Handle) {
        if handle.kind() != Some(ObjectKind::Timer) {
            return;
        }
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        let now = kernel.time.time_ms();
        kernel.timers.start(handle.index(), now);
        kernel.lock.leave();
    }

    pub fn stop(handle: Handle) {
        if handle.kind() != Some(ObjectKind::Timer) {
            return;
        }
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        kernel.timers.stop(handle.index());
        kernel.lock.leave();
    }
}

/// Static queues move data between tasks and interrupt handlers, so the
/// whole module is ISR-callable: operations serialize through the
/// interrupt mask, not the kernel lock.
pub mod queue {
    use core::mem;

    use super::*;
    use crate::QueueStorage;

    /// Create a queue over caller-provided storage.
    pub fn create<T, const N: usize>(
        handle: &mut Handle,
        storage: &'static QueueStorage<T, N>,
        name: Option<&'static str>,
    ) -> bool {
        create_raw(handle, N, mem::size_of::<T>(), storage.base(), name)
    }

    /// Untyped variant of [`create`]; `buffer` must hold
    /// `capacity * elem_size` bytes for the queue's lifetime.
    pub fn create_raw(
        handle: &mut Handle,
        capacity: usize,
        elem_size: usize,
        buffer: *mut u8,
        name: Option<&'static str>,
    ) -> bool {
        let kernel = unsafe { arch::kernel() };
        match kernel.create_queue(capacity, elem_size, buffer, name) {
            Ok(id) => {
                *handle = Handle::create(ObjectKind::Queue, id);
                true
            }
            Err(_) => false,
        }
    }

    /// Look up a queue created with a name.
    pub fn open(handle: &mut Handle, name: &str) -> bool {
        let kernel = unsafe { arch::kernel() };
        match kernel.queues.open(name) {
            Some(id) => {
                *handle = Handle::create(ObjectKind::Queue, id);
                true
            }
            None => false,
        }
    }

    pub fn destroy(handle: Handle) {
        if handle.kind() != Some(ObjectKind::Queue) {
            return;
        }
        let kernel = unsafe { arch::kernel() };
        kernel.queues.destroy(handle.index());
    }

    /// Copy one element into the queue. Fails when full.
    pub fn send<T>(handle: Handle, data: &T) -> bool {
        if handle.kind() != Some(ObjectKind::Queue) {
            return false;
        }
        let kernel = unsafe { arch::kernel() };
        let id = handle.index();
        if kernel.queues.element_size(id) != Some(mem::size_of::<T>()) {
            return false;
        }
        unsafe { kernel.queues.send(id, (data as *const T).cast()) }
    }

    /// Copy the oldest element out of the queue. Fails when empty.
    pub fn receive<T>(handle: Handle, data: &mut T) -> bool {
        if handle.kind() != Some(ObjectKind::Queue) {
            return false;
        }
        let kernel = unsafe { arch::kernel() };
        let id = handle.index();
        if kernel.queues.element_size(id) != Some(mem::size_of::<T>()) {
            return false;
        }
        unsafe { kernel.queues.receive(id, (data as *mut T).cast()) }
    }

    pub fn size(handle: Handle) -> Option<usize> {
        if handle.kind() != Some(ObjectKind::Queue) {
            return None;
        }
        let kernel = unsafe { arch::kernel() };
        kernel.queues.size(handle.index())
    }

    pub fn is_full(handle: Handle) -> Option<bool> {
        if handle.kind() != Some(ObjectKind::Queue) {
            return None;
        }
        let kernel = unsafe { arch::kernel() };
        kernel.queues.is_full(handle.index())
    }

    pub fn is_empty(handle: Handle) -> Option<bool> {
        if handle.kind() != Some(ObjectKind::Queue) {
            return None;
        }
        let kernel = unsafe { arch::kernel() };
        kernel.queues.is_empty(handle.index())
    }
}

pub mod sync {
    use super::*;

    /// Block until the object behind `handle` is signaled. Waitable
    /// kinds: events, timers, queues (non-empty). Destroying an object
    /// that is being waited on invalidates the wait.
    pub fn wait_for_single_object(
        handle: Handle,
        wait_forever: bool,
        timeout: TimeMs,
    ) -> WaitResult {
        wait_for_multiple_objects(&[handle], false, wait_forever, timeout, None)
    }

    /// Block on up to [`MAX_INPUT_SIGNALS`] handles. With `wait_all` the
    /// task wakes once every signal is set, otherwise on the first one,
    /// whose position lands in `signaled_index`. A waiter on a queue
    /// handle wakes when the queue is non-empty; the wake does not
    /// consume an element, so the next wait returns immediately while
    /// the queue stays non-empty.
    pub fn wait_for_multiple_objects(
        handles: &[Handle],
        wait_all: bool,
        wait_forever: bool,
        timeout: TimeMs,
        signaled_index: Option<&mut usize>,
    ) -> WaitResult {
        if handles.is_empty() || handles.len() > MAX_INPUT_SIGNALS {
            return WaitResult::WaitFailed;
        }
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        if !kernel.wait_current_for_objects(handles, wait_all, wait_forever, timeout) {
            kernel.lock.leave();
            return WaitResult::WaitFailed;
        }
        arch::syscall(SyscallId::ExecuteContextSwitch);

        // Back from the wait; the tick stored the outcome in the
        // descriptor before making the task ready.
        kernel.lock.enter();
        let (result, index) = kernel.current_wait_outcome();
        if let Some(signaled_index) = signaled_index {
            *signaled_index = index;
        }
        kernel.lock.leave();
        result
    }
}

/// Task-level mutual exclusion: a lock count plus an auto-reset event the
/// contenders sleep on. Cheaper than a wait when uncontended, and unlike
/// the kernel lock it never delays the tick. Not for interrupt handlers.
pub mod critical_section {
    use super::*;

    pub const DEFAULT_SPIN_COUNT: u32 = 100;

    /// Modifying the fields outside this module is undefined behaviour.
    pub struct Context {
        event: Handle,
        /// Creator of the section; debug information.
        #[allow(dead_code)]
        owner: Handle,
        lock_count: u32,
        spin_count: u32,
    }

    impl Context {
        pub const fn new() -> Self {
            Self {
                event: Handle::new(),
                owner: Handle::new(),
                lock_count: 0,
                spin_count: DEFAULT_SPIN_COUNT,
            }
        }
    }

    impl Default for Context {
        fn default() -> Self {
            Self::new()
        }
    }

    /// `spin_count` tunes how many times `enter` polls the lock before
    /// sleeping on the event; it trades context switches for spinning and
    /// has no correctness role.
    pub fn init(context: &mut Context, spin_count: u32) -> bool {
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        let event_id = match kernel.create_event(false, None) {
            Ok(id) => id,
            Err(_) => {
                kernel.lock.leave();
                return false;
            }
        };
        // The section starts open.
        kernel.events.set(event_id);

        context.event = Handle::create(ObjectKind::Event, event_id);
        context.owner = Handle::create(ObjectKind::Task, *kernel.scheduler.current_task_id());
        context.lock_count = 0;
        context.spin_count = spin_count;
        kernel.lock.leave();
        true
    }

    pub fn deinit(context: &mut Context) {
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        kernel.events.destroy(context.event.index());
        kernel.lock.leave();
    }

    pub fn enter(context: &mut Context) {
        let kernel = unsafe { arch::kernel() };
        let mut spins: u32 = 0;

        // The gap between the event being set and this task running is
        // wide enough for other tasks to grab the section, so the count
        // must be re-tested after every wake.
        loop {
            kernel.lock.enter();
            if context.lock_count == 0 {
                context.lock_count += 1;
                kernel.lock.leave();
                return;
            }
            kernel.lock.leave();

            if spins >= context.spin_count {
                spins = 0;
                let result = sync::wait_for_single_object(context.event, true, 0);
                if result != WaitResult::ObjectSet {
                    klog!("critical section wait failed");
                }
            } else {
                spins += 1;
            }
        }
    }

    pub fn leave(context: &mut Context) {
        let kernel = unsafe { arch::kernel() };

        kernel.lock.enter();
        context.lock_count -= 1;
        if context.lock_count == 0 {
            kernel.events.set(context.event.index());
        }
        kernel.lock.leave();
    }
}
