use abi::{Priority, TaskId, TaskState, WaitResult};

use crate::arch;
use crate::space::Space;
use crate::TASK_MAX;

/// Entry point of a task. Returning terminates the task.
pub type TaskRoutine = fn(*mut ());

/// Per-task descriptor: saved execution state plus bookkeeping the
/// scheduler and the wait machinery read back.
pub(crate) struct Task {
    /// Top of the saved frame; the port pops it on dispatch.
    pub(crate) sp: usize,
    /// Non-volatile register block the trap handler stores into.
    pub(crate) context: arch::TaskContext,
    pub(crate) stack: arch::Stack,
    pub(crate) priority: Priority,
    pub(crate) state: TaskState,
    pub(crate) routine: TaskRoutine,
    pub(crate) parameter: *mut (),
    /// Outcome of the most recent wait, read by the facade on resume.
    pub(crate) wait_result: WaitResult,
    /// Position in the caller's handle array that caused the wake-up.
    pub(crate) last_signal_index: usize,
}

#[derive(Default)]
pub(crate) struct TaskTable {
    data: Space<Task, TASK_MAX>,
}

impl TaskTable {
    /// Allocate a descriptor and build the synthetic return frame on its
    /// stack, aimed at `trampoline`. The trampoline later fetches
    /// `routine` and `parameter` back out of the descriptor.
    pub fn create(
        &mut self,
        trampoline: usize,
        routine: TaskRoutine,
        priority: Priority,
        parameter: *mut (),
        suspended: bool,
    ) -> Option<TaskId> {
        let id = self.data.push(Task {
            sp: 0,
            context: arch::TaskContext::default(),
            stack: arch::Stack::new(),
            priority,
            state: if suspended {
                TaskState::Suspended
            } else {
                TaskState::Ready
            },
            routine,
            parameter,
            wait_result: WaitResult::WaitFailed,
            last_signal_index: 0,
        })?;

        // The frame must be built in place: the stack pointer embeds the
        // slot's address.
        let task = self.data.get_mut(id)?;
        task.stack.init(trampoline);
        task.sp = task.stack.initial_sp();
        Some(TaskId(id))
    }

    pub fn destroy(&mut self, id: TaskId) {
        self.data.remove(*id);
    }

    pub fn is_allocated(&self, id: TaskId) -> bool {
        self.data.is_allocated(*id)
    }

    pub fn priority(&self, id: TaskId) -> Option<Priority> {
        self.data.get(*id).map(|t| t.priority)
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.data.get(*id).map(|t| t.state)
    }

    pub fn set_state(&mut self, id: TaskId, state: TaskState) {
        if let Some(task) = self.data.get_mut(*id) {
            task.state = state;
        }
    }

    pub fn sp(&self, id: TaskId) -> Option<usize> {
        self.data.get(*id).map(|t| t.sp)
    }

    pub fn set_sp(&mut self, id: TaskId, sp: usize) {
        if let Some(task) = self.data.get_mut(*id) {
            task.sp = sp;
        }
    }

    /// Address of the saved register block, handed to the port before a
    /// context switch.
    pub fn context_ptr(&mut self, id: TaskId) -> Option<*mut arch::TaskContext> {
        self.data.get_mut(*id).map(|t| &mut t.context as *mut _)
    }

    pub fn routine(&self, id: TaskId) -> Option<TaskRoutine> {
        self.data.get(*id).map(|t| t.routine)
    }

    pub fn parameter(&self, id: TaskId) -> Option<*mut ()> {
        self.data.get(*id).map(|t| t.parameter)
    }

    pub fn wait_result(&self, id: TaskId) -> Option<WaitResult> {
        self.data.get(*id).map(|t| t.wait_result)
    }

    pub fn set_wait_result(&mut self, id: TaskId, result: WaitResult) {
        if let Some(task) = self.data.get_mut(*id) {
            task.wait_result = result;
        }
    }

    pub fn last_signal_index(&self, id: TaskId) -> Option<usize> {
        self.data.get(*id).map(|t| t.last_signal_index)
    }

    pub fn set_last_signal_index(&mut self, id: TaskId, index: usize) {
        if let Some(task) = self.data.get_mut(*id) {
            task.last_signal_index = index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: *mut ()) {}

    #[test]
    fn create_assigns_slots_in_order() {
        let mut tasks = TaskTable::default();
        for i in 0..TASK_MAX {
            let id = tasks
                .create(0x100, noop, Priority::Low, core::ptr::null_mut(), false)
                .unwrap();
            assert_eq!(*id, i);
        }
        assert!(tasks
            .create(0x100, noop, Priority::Low, core::ptr::null_mut(), false)
            .is_none());
    }

    #[test]
    fn initial_frame_targets_the_trampoline() {
        let mut tasks = TaskTable::default();
        let trampoline = 0x0800_1234usize;
        let id = tasks
            .create(trampoline, noop, Priority::Medium, core::ptr::null_mut(), false)
            .unwrap();
        let sp = tasks.sp(id).unwrap();
        // The frame sits at the bottom of the stack buffer and the saved
        // pc slot holds the trampoline.
        let frame = unsafe { core::slice::from_raw_parts(sp as *const u32, 8) };
        assert_eq!(frame[6], trampoline as u32);
        assert_ne!(frame[7], 0, "status word must set the ISA mode");
    }

    #[test]
    fn suspended_creation_sets_state() {
        let mut tasks = TaskTable::default();
        let id = tasks
            .create(0x100, noop, Priority::High, core::ptr::null_mut(), true)
            .unwrap();
        assert_eq!(tasks.state(id), Some(TaskState::Suspended));
    }

    #[test]
    fn destroyed_task_rejects_accessors() {
        let mut tasks = TaskTable::default();
        let id = tasks
            .create(0x100, noop, Priority::Low, core::ptr::null_mut(), false)
            .unwrap();
        tasks.destroy(id);
        assert!(!tasks.is_allocated(id));
        assert_eq!(tasks.priority(id), None);
        assert_eq!(tasks.state(id), None);
    }
}
