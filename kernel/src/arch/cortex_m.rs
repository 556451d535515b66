//! ARMv7-M port: SVC/PendSV/SysTick handlers, PSP bookkeeping, BASEPRI
//! masking and the ITM debug sink.
//!
//! The two context pointers are the only ABI shared with the naked trap
//! handlers, which store and load the non-volatile register block through
//! them without arguments.

use core::arch::asm;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use abi::SyscallId;
use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{ITM, NVIC, SCB};
use cortex_m::register::basepri;

use crate::{Kernel, CORE_CLOCK_HZ, STACK_SIZE_WORDS};

static mut KERNEL: MaybeUninit<Kernel> = MaybeUninit::uninit();

static CURRENT_CONTEXT: AtomicPtr<TaskContext> = AtomicPtr::new(ptr::null_mut());
static NEXT_CONTEXT: AtomicPtr<TaskContext> = AtomicPtr::new(ptr::null_mut());

const SYSTICK_HZ: u32 = 1_000;

// Priority layout: two preemption bits, two sub-priority bits.
const PREEMPTION_BITS: u32 = 2;
const TOTAL_PRIORITY_BITS: u32 = 4;

// 'Return to thread mode, use PSP' exception return.
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Preemption groups, strongest first. The kernel traps and the tick
/// share `Kernel` so they cannot preempt each other; `Critical` sections
/// mask even the tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preemption {
    Critical,
    Kernel,
    User,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sub {
    High,
    Medium,
    Low,
}

/// Saved non-volatile register block, r4-r11. The hardware pushes the
/// rest of the frame itself.
#[repr(C)]
#[derive(Debug, Default)]
pub struct TaskContext {
    regs: [u32; 8],
}

/// Task stack buffer with the synthetic exception frame at the bottom
/// (full descending stack).
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

    pub fn initial_sp(&self) -> usize {
        &self.data[STACK_SIZE_WORDS - 8] as *const u32 as usize
    }
}

fn priority_value(preemption: Preemption, sub: Sub) -> u8 {
    // Preemption value 0 is reserved; shift the group so it is skipped.
    let preemption = preemption as u32 + 1;
    let sub = sub as u32;
    (((preemption << (8 - PREEMPTION_BITS)) | (sub << (8 - TOTAL_PRIORITY_BITS))) & 0xFF) as u8
}

/// BASEPRI-masking guard: interrupts of `Critical` preemption and below
/// cannot run until the guard drops. Event and queue tables take it so
/// their operations stay ISR-callable.
pub struct IsrGuard {
    saved: u8,
}

impl IsrGuard {
    pub fn new() -> Self {
        let saved = basepri::read();
        let mask = ((Preemption::Critical as u32 + 1) << (8 - PREEMPTION_BITS)) as u8;
        unsafe { basepri::write(mask) };
        // Re-order barrier; the masked section must not leak past it.
        cortex_m::asm::dsb();
        IsrGuard { saved }
    }
}

impl Drop for IsrGuard {
    fn drop(&mut self) {
        cortex_m::asm::dsb();
        unsafe { basepri::write(self.saved) };
    }
}

/// Install a fresh kernel into the port-owned slot.
///
/// # Safety
///
/// Must run before the tick source is live.
pub unsafe fn init_kernel() -> &'static mut Kernel {
    let slot = &mut *ptr::addr_of_mut!(KERNEL);
    slot.write(Kernel::new())
}

/// # Safety
///
/// [`init_kernel`] must have run. Thread-mode callers serialize through
/// the kernel lock; handlers run at one priority and cannot nest.
pub unsafe fn kernel() -> &'static mut Kernel {
    (*ptr::addr_of_mut!(KERNEL)).assume_init_mut()
}

pub fn init() {
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.set_reload(CORE_CLOCK_HZ / SYSTICK_HZ - 1);
    p.SYST.clear_current();
    p.SYST.enable_counter();

    debug::init();

    unsafe {
        // Binary point between preemption and sub-priority bits.
        const SCB_AIRCR_VECTKEY: u32 = 0x05FA << 16;
        let grouping = 7 - PREEMPTION_BITS;
        p.SCB.aircr.write(SCB_AIRCR_VECTKEY | (grouping << 8));

        // The kernel traps and the tick run at one priority so they
        // cannot preempt each other.
        let kernel_prio = priority_value(Preemption::Kernel, Sub::Low);
        p.SCB.set_priority(SystemHandler::SVCall, kernel_prio);
        p.SCB.set_priority(SystemHandler::PendSV, kernel_prio);
        p.SCB.set_priority(SystemHandler::SysTick, kernel_prio);
    }
}

/// Let the tick fire; it is the only PendSV trigger, so it goes live
/// last.
pub fn start() {
    let mut p = unsafe { cortex_m::Peripherals::steal() };
    p.SYST.enable_interrupt();
}

pub fn syscall(id: SyscallId) {
    // Complete explicit memory transfers before trapping.
    cortex_m::asm::dmb();
    match id {
        SyscallId::LoadNextTask => unsafe { asm!("svc #0") },
        SyscallId::ExecuteContextSwitch => unsafe { asm!("svc #1") },
    }
}

pub fn sp() -> usize {
    cortex_m::register::psp::read() as usize
}

pub fn set_sp(sp: usize) {
    unsafe { cortex_m::register::psp::write(sp as u32) };
}

pub fn set_current_context(context: *mut TaskContext) {
    CURRENT_CONTEXT.store(context, Ordering::SeqCst);
}

pub fn set_next_context(context: *mut TaskContext) {
    NEXT_CONTEXT.store(context, Ordering::SeqCst);
}

pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

pub fn fatal() -> ! {
    debug::breakpoint();
    loop {
        cortex_m::asm::wfi();
    }
}

/// Enable a vendor interrupt line.
pub fn enable_interrupt(irq: u16) {
    unsafe {
        let nvic = &*NVIC::PTR;
        nvic.iser[usize::from(irq / 32)].write(1 << u32::from(irq % 32));
    }
}

pub fn set_interrupt_priority(irq: u16, preemption: Preemption, sub: Sub) {
    unsafe {
        let nvic = &*NVIC::PTR;
        nvic.ipr[usize::from(irq)].write(priority_value(preemption, sub));
    }
}

pub mod debug {
    use super::ITM;

    pub(super) fn init() {
        unsafe {
            let itm = &*ITM::PTR;
            itm.tcr.modify(|tcr| tcr | 1); // ITM enable
            itm.ter[0].write(1); // port 0 enable
        }
    }

    pub fn putchar(c: u8) {
        unsafe {
            let itm = &mut *ITM::PTR.cast_mut();
            while !itm.stim[0].is_fifo_ready() {}
            itm.stim[0].write_u8(c);
        }
    }

    pub fn print(s: &str) {
        for c in s.bytes() {
            putchar(c);
        }
    }

    pub fn breakpoint() {
        cortex_m::asm::bkpt();
    }
}

// Trap handlers. SVC dispatches on the immediate encoded in the
// instruction itself; PendSV performs the actual register save/load and
// may tail-chain from either SVC or the tick.

#[no_mangle]
unsafe extern "C" fn SysTick() {
    let execute_context_switch = kernel().tick();
    // Complete unfinished transfers from the tick before pending PendSV.
    cortex_m::asm::dsb();
    if execute_context_switch {
        SCB::set_pendsv();
    }
}

#[naked]
#[no_mangle]
unsafe extern "C" fn SVCall() {
    // The stacked frame lives on MSP or PSP depending on the caller's
    // mode; bit 2 of lr tells which.
    asm!(
        "tst lr, #4",
        "ite eq",
        "mrseq r0, msp",
        "mrsne r0, psp",
        "b {handler}",
        handler = sym svcall_handler,
        options(noreturn)
    );
}

unsafe extern "C" fn svcall_handler(frame: *const u32) {
    // frame: r0, r1, r2, r3, r12, lr, return address, xPSR. The svc
    // immediate sits in the low byte of the instruction before the
    // return address.
    let return_address = *frame.add(6) as *const u8;
    let svc_number = *return_address.sub(2);

    match svc_number {
        0 => {
            // LoadNextTask: no context to save.
            kernel().load_next_task();
            cortex_m::asm::dsb();
            load_task();
        }
        1 => {
            // ExecuteContextSwitch: the store/load happens in PendSV so
            // it can also tail-chain from the tick.
            kernel().switch_context();
            cortex_m::asm::dsb();
            cortex_m::asm::isb();
            SCB::set_pendsv();
        }
        _ => {}
    }
}

#[naked]
unsafe extern "C" fn load_task() -> ! {
    asm!(
        "cpsid i",
        "ldr r0, ={next}",
        "ldr r1, [r0]",
        "ldm r1, {{r4-r11}}",
        "ldr r0, ={exc_return}",
        "cpsie i",
        "dsb",
        "isb",
        "bx r0",
        next = sym NEXT_CONTEXT,
        exc_return = const EXC_RETURN_THREAD_PSP,
        options(noreturn)
    );
}

#[naked]
#[no_mangle]
unsafe extern "C" fn PendSV() {
    // Naked: the exception return must be issued by hand or PendSV would
    // return into the preempted handler, losing the thread state.
    asm!(
        "cpsid i",
        "ldr r0, ={current}",
        "ldr r1, [r0]",
        "stm r1, {{r4-r11}}",
        "ldr r0, ={next}",
        "ldr r1, [r0]",
        "ldm r1, {{r4-r11}}",
        "ldr r0, ={exc_return}",
        "cpsie i",
        "dsb",
        "isb",
        "bx r0",
        current = sym CURRENT_CONTEXT,
        next = sym NEXT_CONTEXT,
        exc_return = const EXC_RETURN_THREAD_PSP,
        options(noreturn)
    );
}
