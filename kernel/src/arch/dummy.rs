//! Host-side port used by the test suite (and any non-embedded build).
//!
//! It honors the same contract as the hardware port, minus the register
//! swapping: `syscall` runs the corresponding trap glue synchronously, so
//! the scheduler bookkeeping follows the exact hardware control flow while
//! execution stays on the host thread.

use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use abi::SyscallId;

use crate::{Kernel, STACK_SIZE_WORDS};

static mut KERNEL: MaybeUninit<Kernel> = MaybeUninit::uninit();

static SP: AtomicUsize = AtomicUsize::new(0);
static CURRENT_CONTEXT: AtomicPtr<TaskContext> = AtomicPtr::new(ptr::null_mut());
static NEXT_CONTEXT: AtomicPtr<TaskContext> = AtomicPtr::new(ptr::null_mut());

/// Saved non-volatile register block (r4-r11 on the real port). The dummy
/// port never fills it in.
#[repr(C)]
#[derive(Debug, Default)]
pub struct TaskContext {
    regs: [u32; 8],
}

/// Task stack buffer. The initial frame mirrors the ARMv7-M exception
/// frame byte for byte, so stack setup is testable on the host.
pub struct Stack {
    data: [u32; STACK_SIZE_WORDS],
}

// Tracks stack overflows when spotted in a debugger.
const REGISTER_SENTINEL: u32 = 0xCDCD_CDCD;
// Returning through this value faults.
const LINK_REGISTER_RESET: u32 = 0xFFFF_FFFF;
// Thumb ISA bit of xPSR.
const PSR_THUMB: u32 = 0x0100_0000;

impl Stack {
    pub fn new() -> Self {
        Self {
            data: [0; STACK_SIZE_WORDS],
        }
    }

    /// Build the synthetic interrupt-return frame targeting `routine`.
    pub fn init(&mut self, routine_address: usize) {
        let top = STACK_SIZE_WORDS;
        self.data[top - 8] = REGISTER_SENTINEL; // r0
        self.data[top - 7] = REGISTER_SENTINEL; // r1
        self.data[top - 6] = REGISTER_SENTINEL; // r2
        self.data[top - 5] = REGISTER_SENTINEL; // r3
        self.data[top - 4] = REGISTER_SENTINEL; // r12
        self.data[top - 3] = LINK_REGISTER_RESET; // lr
        self.data[top - 2] = routine_address as u32; // pc
        self.data[top - 1] = PSR_THUMB; // xPSR
    }

    /// Top of the frame the dispatch pops, at the bottom of the buffer
    /// (full descending stack).
    pub fn initial_sp(&self) -> usize {
        &self.data[STACK_SIZE_WORDS - 8] as *const u32 as usize
    }
}

/// Interrupt-masking guard; nothing to mask on the host.
pub struct IsrGuard;

impl IsrGuard {
    pub fn new() -> Self {
        IsrGuard
    }
}

/// Install a fresh kernel into the port-owned slot.
///
/// # Safety
///
/// Must not race other access to the kernel; call before the tick source
/// is live.
pub unsafe fn init_kernel() -> &'static mut Kernel {
    let slot = &mut *ptr::addr_of_mut!(KERNEL);
    slot.write(Kernel::new())
}

/// # Safety
///
/// [`init_kernel`] must have run, and callers must serialize access.
pub unsafe fn kernel() -> &'static mut Kernel {
    (*ptr::addr_of_mut!(KERNEL)).assume_init_mut()
}

pub fn init() {}

pub fn start() {}

/// Run the requested trap glue in place.
pub fn syscall(id: SyscallId) {
    let kernel = unsafe { kernel() };
    match id {
        SyscallId::LoadNextTask => kernel.load_next_task(),
        SyscallId::ExecuteContextSwitch => kernel.switch_context(),
    }
}

pub fn sp() -> usize {
    SP.load(Ordering::SeqCst)
}

pub fn set_sp(sp: usize) {
    SP.store(sp, Ordering::SeqCst);
}

pub fn set_current_context(context: *mut TaskContext) {
    CURRENT_CONTEXT.store(context, Ordering::SeqCst);
}

pub fn set_next_context(context: *mut TaskContext) {
    NEXT_CONTEXT.store(context, Ordering::SeqCst);
}

pub fn wait_for_interrupt() {}

pub fn fatal() -> ! {
    panic!("kernel state corrupted");
}

pub mod debug {
    pub fn putchar(_c: u8) {}

    pub fn print(s: &str) {
        for c in s.bytes() {
            putchar(c);
        }
    }

    pub fn breakpoint() {}
}
