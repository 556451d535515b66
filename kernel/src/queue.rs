use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr;

use crate::arch::IsrGuard;
use crate::space::Space;
use crate::QUEUE_MAX;

/// Caller-supplied backing storage for a static queue.
///
/// Lives wherever the user puts it (normally a `static`); the kernel only
/// keeps a raw pointer to it. Modifying the storage outside the queue API
/// while the queue exists is undefined behaviour.
#[repr(transparent)]
pub struct QueueStorage<T, const N: usize> {
    data: UnsafeCell<MaybeUninit<[T; N]>>,
}

// The queue API serializes all access through an interrupt mask.
unsafe impl<T: Send, const N: usize> Sync for QueueStorage<T, N> {}

impl<T, const N: usize> QueueStorage<T, N> {
    pub const fn new() -> Self {
        Self {
            data: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.data.get().cast()
    }
}

impl<T, const N: usize> Default for QueueStorage<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded FIFO over caller-supplied raw storage, element-size agnostic.
/// `head` tracks the newest element, `tail` the oldest.
#[derive(Debug)]
pub(crate) struct Queue {
    current_size: usize,
    head: usize,
    tail: usize,
    capacity: usize,
    elem_size: usize,
    data: *mut u8,
    name: Option<&'static str>,
}

/// Queues move data between tasks and interrupt handlers, so every
/// operation runs under the port's interrupt mask rather than the kernel
/// lock.
#[derive(Debug, Default)]
pub(crate) struct QueueTable {
    data: Space<Queue, QUEUE_MAX>,
}

impl QueueTable {
    pub fn create(
        &mut self,
        capacity: usize,
        elem_size: usize,
        buffer: *mut u8,
        name: Option<&'static str>,
    ) -> Option<usize> {
        if buffer.is_null() || capacity == 0 || elem_size == 0 {
            return None;
        }
        let _guard = IsrGuard::new();
        self.data.push(Queue {
            current_size: 0,
            head: 0,
            tail: 0,
            capacity,
            elem_size,
            data: buffer,
            name,
        })
    }

    pub fn open(&self, name: &str) -> Option<usize> {
        let _guard = IsrGuard::new();
        self.data
            .entries()
            .find(|(_, queue)| queue.name == Some(name))
            .map(|(id, _)| id)
    }

    pub fn destroy(&mut self, id: usize) {
        let _guard = IsrGuard::new();
        self.data.remove(id);
    }

    pub fn is_full(&self, id: usize) -> Option<bool> {
        let _guard = IsrGuard::new();
        self.data.get(id).map(|q| q.current_size >= q.capacity)
    }

    pub fn is_empty(&self, id: usize) -> Option<bool> {
        let _guard = IsrGuard::new();
        self.data.get(id).map(|q| q.current_size == 0)
    }

    pub fn size(&self, id: usize) -> Option<usize> {
        let _guard = IsrGuard::new();
        self.data.get(id).map(|q| q.current_size)
    }

    pub fn element_size(&self, id: usize) -> Option<usize> {
        let _guard = IsrGuard::new();
        self.data.get(id).map(|q| q.elem_size)
    }

    /// Copy one element from `src` to the head of the queue. Fails iff the
    /// queue is full or the id is stale, leaving the queue unchanged.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of the queue's element size.
    pub unsafe fn send(&mut self, id: usize, src: *const u8) -> bool {
        let _guard = IsrGuard::new();
        let queue = match self.data.get_mut(id) {
            Some(queue) => queue,
            None => return false,
        };
        if queue.current_size >= queue.capacity {
            return false;
        }
        if queue.current_size > 0 {
            queue.head += 1;
            if queue.head >= queue.capacity {
                queue.head = 0;
            }
        }
        ptr::copy_nonoverlapping(
            src,
            queue.data.add(queue.elem_size * queue.head),
            queue.elem_size,
        );
        queue.current_size += 1;
        true
    }

    /// Copy the oldest element into `dst`. Fails iff the queue is empty or
    /// the id is stale, leaving the queue and `dst` unchanged.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of the queue's element size.
    pub unsafe fn receive(&mut self, id: usize, dst: *mut u8) -> bool {
        let _guard = IsrGuard::new();
        let queue = match self.data.get_mut(id) {
            Some(queue) => queue,
            None => return false,
        };
        if queue.current_size == 0 {
            return false;
        }
        ptr::copy_nonoverlapping(
            queue.data.add(queue.elem_size * queue.tail),
            dst,
            queue.elem_size,
        );
        if queue.current_size > 1 {
            queue.tail += 1;
            if queue.tail >= queue.capacity {
                queue.tail = 0;
            }
        }
        queue.current_size -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_queue(buf: &mut [u8]) -> (QueueTable, usize) {
        let mut queues = QueueTable::default();
        let id = queues.create(buf.len(), 1, buf.as_mut_ptr(), None).unwrap();
        (queues, id)
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut buf = [0u8; 4];
        let (mut queues, id) = byte_queue(&mut buf);

        for b in [0x41u8, 0x42, 0x43] {
            assert!(unsafe { queues.send(id, &b) });
        }
        assert_eq!(queues.size(id), Some(3));

        let mut out = 0u8;
        for expected in [0x41u8, 0x42, 0x43] {
            assert!(unsafe { queues.receive(id, &mut out) });
            assert_eq!(out, expected);
        }
        assert_eq!(queues.is_empty(id), Some(true));
    }

    #[test]
    fn interleaved_send_receive_wraps_cleanly() {
        let mut buf = [0u8; 3];
        let (mut queues, id) = byte_queue(&mut buf);

        let mut sent = 0u8;
        let mut received = 0u8;
        let mut out = 0u8;
        // Mixed pattern that repeatedly crosses the wrap point.
        for step in 0..40 {
            if step % 3 != 2 {
                if unsafe { queues.send(id, &sent) } {
                    sent = sent.wrapping_add(1);
                }
            } else {
                if unsafe { queues.receive(id, &mut out) } {
                    assert_eq!(out, received);
                    received = received.wrapping_add(1);
                }
            }
        }
        while unsafe { queues.receive(id, &mut out) } {
            assert_eq!(out, received);
            received = received.wrapping_add(1);
        }
        assert_eq!(sent, received);
    }

    #[test]
    fn send_on_full_queue_fails_and_changes_nothing() {
        let mut buf = [0u8; 2];
        let (mut queues, id) = byte_queue(&mut buf);

        assert!(unsafe { queues.send(id, &1u8) });
        assert!(unsafe { queues.send(id, &2u8) });
        let snapshot = buf;

        assert!(!unsafe { queues.send(id, &3u8) });
        assert_eq!(queues.size(id), Some(2));
        assert_eq!(buf, snapshot);
    }

    #[test]
    fn receive_on_empty_queue_fails_and_changes_nothing() {
        let mut buf = [0u8; 2];
        let (mut queues, id) = byte_queue(&mut buf);

        let mut out = 0x5Au8;
        assert!(!unsafe { queues.receive(id, &mut out) });
        assert_eq!(out, 0x5A);
        assert_eq!(queues.size(id), Some(0));
    }

    #[test]
    fn wide_elements_copy_whole_values() {
        let mut buf = [0u32; 4];
        let mut queues = QueueTable::default();
        let id = queues
            .create(4, core::mem::size_of::<u32>(), buf.as_mut_ptr().cast(), None)
            .unwrap();

        for v in [0xDEAD_BEEFu32, 0x0102_0304] {
            assert!(unsafe { queues.send(id, (&v as *const u32).cast()) });
        }
        let mut out = 0u32;
        assert!(unsafe { queues.receive(id, (&mut out as *mut u32).cast()) });
        assert_eq!(out, 0xDEAD_BEEF);
        assert!(unsafe { queues.receive(id, (&mut out as *mut u32).cast()) });
        assert_eq!(out, 0x0102_0304);
    }

    #[test]
    fn open_finds_named_queue() {
        let mut buf = [0u8; 2];
        let mut queues = QueueTable::default();
        let id = queues
            .create(2, 1, buf.as_mut_ptr(), Some("events"))
            .unwrap();
        assert_eq!(queues.open("events"), Some(id));
        assert_eq!(queues.open("other"), None);
        queues.destroy(id);
        assert_eq!(queues.open("events"), None);
    }
}
