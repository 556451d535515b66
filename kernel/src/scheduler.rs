use abi::{Handle, Priority, TaskId, TaskState, TimeMs};

use crate::event::EventTable;
use crate::queue::QueueTable;
use crate::ring::Ring;
use crate::task::TaskTable;
use crate::timer::TimerTable;
use crate::wait::{self, WaitList};
use crate::TASK_MAX;

/// Ready tasks of one priority: a circular list of task ids plus the
/// round-robin cursor.
#[derive(Debug, Default)]
struct ReadyList {
    ring: Ring<TaskId, TASK_MAX>,
    cursor: usize,
}

impl ReadyList {
    /// Insert `id`, rejecting duplicates. The first insertion seeds the
    /// cursor.
    fn add(&mut self, id: TaskId) -> bool {
        if self.ring.find(id).is_some() {
            return false;
        }
        let count = self.ring.len();
        match self.ring.add(id) {
            Some(node) => {
                if count == 0 {
                    self.cursor = node;
                }
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, id: TaskId) {
        let found = match self.ring.find(id) {
            Some(found) => found,
            None => return,
        };
        // Removing the cursor node moves the cursor to its successor.
        if self.cursor == found && self.ring.len() > 1 {
            if let Some(next) = self.ring.next_index(found) {
                self.cursor = next;
            }
        }
        self.ring.remove(found);
    }

    /// Advance the cursor and return the task under it.
    fn next(&mut self) -> Option<TaskId> {
        let count = self.ring.len();
        if count > 1 {
            let next = self.ring.next_index(self.cursor)?;
            self.cursor = next;
            self.ring.at(next)
        } else if count == 1 {
            self.ring.at(self.cursor)
        } else {
            None
        }
    }

    /// Task under the cursor, without advancing.
    fn current(&self) -> Option<TaskId> {
        if self.ring.len() > 0 {
            self.ring.at(self.cursor)
        } else {
            None
        }
    }

    #[cfg(test)]
    fn contains(&self, id: TaskId) -> bool {
        self.ring.find(id).is_some()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.ring.len()
    }
}

/// Decides which task runs next. Owns the per-priority ready lists and the
/// wait list; task descriptors stay in the task table and are threaded in
/// by the caller, so the scheduler never cares whether an id is valid.
pub(crate) struct Scheduler {
    current: TaskId,
    next: TaskId,
    ready: [ReadyList; Priority::COUNT],
    waiting: WaitList,
}

impl Default for Scheduler {
    fn default() -> Self {
        // The idle task must exist from kernel init onward and occupies
        // slot 0, so ids start out pointing at it.
        Self {
            current: TaskId::idle(),
            next: TaskId::idle(),
            ready: Default::default(),
            waiting: WaitList::default(),
        }
    }
}

impl Scheduler {
    /// Insert into the ready list of the task's priority and mark it
    /// Ready (unless it is the running task).
    pub fn add_ready(&mut self, tasks: &mut TaskTable, id: TaskId) -> bool {
        let priority = match tasks.priority(id) {
            Some(priority) => priority,
            None => return false,
        };
        if !self.ready[priority.index()].add(id) {
            return false;
        }
        if tasks.state(id) != Some(TaskState::Running) {
            tasks.set_state(id, TaskState::Ready);
        }
        true
    }

    /// A suspended task sits in the task table only.
    pub fn add_suspended(&mut self, tasks: &mut TaskTable, id: TaskId) -> bool {
        tasks.set_state(id, TaskState::Suspended);
        true
    }

    /// Only suspended tasks can be resumed; waiting tasks cannot.
    pub fn resume_suspended(&mut self, tasks: &mut TaskTable, id: TaskId) -> bool {
        if tasks.state(id) != Some(TaskState::Suspended) {
            return false;
        }
        self.add_ready(tasks, id)
    }

    pub fn set_suspended(&mut self, tasks: &mut TaskTable, id: TaskId) {
        tasks.set_state(id, TaskState::Suspended);
        if let Some(priority) = tasks.priority(id) {
            self.ready[priority.index()].remove(id);
        }
        self.waiting.remove(id);
    }

    pub fn set_sleep(
        &mut self,
        tasks: &mut TaskTable,
        id: TaskId,
        interval: TimeMs,
        now: TimeMs,
    ) -> bool {
        if !self.waiting.add_sleep(id, interval, now) {
            return false;
        }
        self.block(tasks, id);
        true
    }

    pub fn set_wait_for_objects(
        &mut self,
        tasks: &mut TaskTable,
        id: TaskId,
        signals: &[Handle],
        wait_all: bool,
        wait_forever: bool,
        timeout: TimeMs,
        now: TimeMs,
    ) -> bool {
        if !self
            .waiting
            .add_wait_for_objects(id, signals, wait_all, wait_forever, timeout, now)
        {
            return false;
        }
        self.block(tasks, id);
        true
    }

    fn block(&mut self, tasks: &mut TaskTable, id: TaskId) {
        if let Some(priority) = tasks.priority(id) {
            self.ready[priority.index()].remove(id);
        }
        tasks.set_state(id, TaskState::Waiting);
    }

    /// Remove every trace of a task; used on terminate.
    pub fn remove_task(&mut self, tasks: &mut TaskTable, id: TaskId) {
        if let Some(priority) = tasks.priority(id) {
            self.ready[priority.index()].remove(id);
        }
        self.waiting.remove(id);
    }

    /// Round-robin dispatch: advance the cursor of the first non-empty
    /// priority and hand the CPU over. Empty rings everywhere would
    /// violate the idle-task invariant, so `None` marks kernel-state
    /// corruption.
    pub fn get_next_task(&mut self, tasks: &mut TaskTable) -> Option<TaskId> {
        for priority in Priority::ALL {
            if let Some(found) = self.ready[priority.index()].next() {
                self.next = found;
                self.dispatch(tasks);
                return Some(found);
            }
        }
        None
    }

    /// Like [`Self::get_next_task`] but without advancing the cursor.
    /// Used on first dispatch and on the trap path, where the decision
    /// "who runs" was already made by state changes.
    pub fn get_current_task(&mut self, tasks: &mut TaskTable) -> Option<TaskId> {
        for priority in Priority::ALL {
            if let Some(found) = self.ready[priority.index()].current() {
                self.next = found;
                self.dispatch(tasks);
                return Some(found);
            }
        }
        None
    }

    /// Effect the Running-state handover decided in `self.next`.
    fn dispatch(&mut self, tasks: &mut TaskTable) {
        if self.current != self.next && tasks.state(self.current) == Some(TaskState::Running) {
            tasks.set_state(self.current, TaskState::Ready);
        }
        tasks.set_state(self.next, TaskState::Running);
        self.current = self.next;
    }

    pub fn current_task_id(&self) -> TaskId {
        self.current
    }

    /// Evaluate every wait item; wake the fulfilled ones. Runs from the
    /// tick with the wake bookkeeping the facade later reads back.
    pub fn check_wait_conditions(
        &mut self,
        tasks: &mut TaskTable,
        timers: &TimerTable,
        events: &mut EventTable,
        queues: &QueueTable,
        now: TimeMs,
    ) {
        for slot in 0..TASK_MAX {
            let (id, fulfilled) = match self.waiting.get(slot) {
                Some(item) => (
                    item.id,
                    wait::check(&item.conditions, timers, events, queues, now),
                ),
                None => continue,
            };
            let (result, signal_index) = match fulfilled {
                Some(outcome) => outcome,
                None => continue,
            };
            self.waiting.free(slot);
            if self.add_ready(tasks, id) {
                tasks.set_wait_result(id, result);
                tasks.set_last_signal_index(id, signal_index);
            }
        }
    }

    /// True while the task is parked in some ready list. Test hook for
    /// the bookkeeping invariants.
    #[cfg(test)]
    pub fn in_ready_list(&self, id: TaskId) -> bool {
        self.ready.iter().any(|list| list.contains(id))
    }

    #[cfg(test)]
    pub fn ready_count(&self, priority: Priority) -> usize {
        self.ready[priority.index()].len()
    }

    #[cfg(test)]
    pub fn in_wait_list(&self, id: TaskId) -> bool {
        (0..TASK_MAX).any(|slot| self.waiting.get(slot).map_or(false, |item| item.id == id))
    }

    #[cfg(test)]
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_list_rejects_duplicates() {
        let mut list = ReadyList::default();
        assert!(list.add(TaskId(1)));
        assert!(!list.add(TaskId(1)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn ready_list_cursor_starts_on_first_task() {
        let mut list = ReadyList::default();
        list.add(TaskId(4));
        list.add(TaskId(5));
        assert_eq!(list.current(), Some(TaskId(4)));
    }

    #[test]
    fn ready_list_next_rotates_through_all_tasks() {
        let mut list = ReadyList::default();
        for id in 1..=3 {
            list.add(TaskId(id));
        }
        // Cursor starts on 1, so the rotation begins at 2.
        let rotation: Vec<_> = (0..6).map(|_| list.next().unwrap()).collect();
        assert_eq!(
            rotation,
            [2, 3, 1, 2, 3, 1].map(TaskId).to_vec(),
            "each lap visits every task once"
        );
    }

    #[test]
    fn ready_list_single_task_keeps_running() {
        let mut list = ReadyList::default();
        list.add(TaskId(7));
        assert_eq!(list.next(), Some(TaskId(7)));
        assert_eq!(list.next(), Some(TaskId(7)));
    }

    #[test]
    fn removing_the_cursor_task_moves_the_cursor_to_its_successor() {
        let mut list = ReadyList::default();
        for id in 1..=3 {
            list.add(TaskId(id));
        }
        list.remove(TaskId(1));
        assert_eq!(list.current(), Some(TaskId(2)));
        // The rotation now alternates between the two survivors.
        assert_eq!(list.next(), Some(TaskId(3)));
        assert_eq!(list.next(), Some(TaskId(2)));
        assert_eq!(list.next(), Some(TaskId(3)));
    }

    #[test]
    fn removing_the_last_task_empties_the_list() {
        let mut list = ReadyList::default();
        list.add(TaskId(9));
        list.remove(TaskId(9));
        assert_eq!(list.current(), None);
        assert_eq!(list.next(), None);
        assert!(list.add(TaskId(9)));
    }
}
