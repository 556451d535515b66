#![no_std]

//! Shared kernel types: object handles, task identity, wait outcomes.
//!
//! Everything here crosses the boundary between the kernel proper and its
//! users (tasks and the CPU port), so the layout of these types is part of
//! the kernel contract.

use core::ops::Deref;

/// Milliseconds since the kernel started. Free-running, wraps modulo 2^32;
/// interval arithmetic must use wrapping subtraction.
pub type TimeMs = u32;

mycelium_bitfield::bitfield! {
    /// Opaque reference to a kernel object, packing a 16-bit object kind
    /// tag over a 16-bit slot index.
    ///
    /// A handle to a destroyed object still decodes; the owning table
    /// rejects the unallocated slot.
    #[derive(Eq, PartialEq)]
    pub struct Handle<u32> {
        pub const INDEX = 16;
        pub const KIND = 16;
    }
}

impl Handle {
    pub fn create(kind: ObjectKind, index: usize) -> Self {
        Self::new()
            .with(Self::INDEX, index as u32 & 0xFFFF)
            .with(Self::KIND, kind as u32)
    }

    /// Kind tag, or `None` if the tag bits hold no known kind.
    pub fn kind(self) -> Option<ObjectKind> {
        ObjectKind::from_bits(self.get(Self::KIND))
    }

    pub fn index(self) -> usize {
        self.get(Self::INDEX) as usize
    }
}

/// What a [`Handle`] refers to.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ObjectKind {
    Task = 0,
    Timer = 1,
    Event = 2,
    Queue = 3,
}

impl ObjectKind {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(ObjectKind::Task),
            1 => Some(ObjectKind::Timer),
            2 => Some(ObjectKind::Event),
            3 => Some(ObjectKind::Queue),
            _ => None,
        }
    }
}

/// Index of a task in the task table. Stable for the task's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(pub usize);

impl Deref for TaskId {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TaskId {
    /// The idle task is created first and always occupies slot 0.
    pub const fn idle() -> TaskId {
        TaskId(0)
    }
}

/// Task priority. The idle priority must stay last; the idle task is the
/// only task expected to run at it.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    High = 0,
    Medium = 1,
    Low = 2,
    Idle = 3,
}

impl Priority {
    pub const COUNT: usize = 4;

    /// Scheduler scan order, highest priority first.
    pub const ALL: [Priority; Priority::COUNT] = [
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::Idle,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Numerically smaller priorities preempt larger ones.
    pub fn preempts(self, other: Priority) -> bool {
        (self as u8) < (other as u8)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    Suspended,
    Waiting,
    Ready,
    Running,
}

/// Outcome of a wait operation, stored in the task descriptor and read
/// back by the facade once the task resumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitResult {
    ObjectSet,
    TimeoutOccurred,
    WaitFailed,
    InvalidHandle,
}

/// Software traps the kernel requests from the CPU port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyscallId {
    /// Load the next task's frame without saving any previous context.
    /// Used at start-up and on terminate-self.
    LoadNextTask,
    /// Save the running task's frame, then load the next one.
    ExecuteContextSwitch,
}
