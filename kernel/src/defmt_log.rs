//! `defmt` transport over the ITM character sink.

use core::ptr;

use defmt::global_logger;

use crate::arch;

#[global_logger]
struct KernelLogger;

static mut ENCODER: defmt::Encoder = defmt::Encoder::new();

defmt::timestamp!("{=u32:ms}", crate::api::time_ms());

// Safety: the kernel is single-core and log frames are not re-entered;
// handlers that log run at one priority and cannot nest.
unsafe impl defmt::Logger for KernelLogger {
    fn acquire() {
        unsafe {
            (*ptr::addr_of_mut!(ENCODER)).start_frame(write_bytes);
        }
    }

    unsafe fn flush() {}

    unsafe fn release() {
        (*ptr::addr_of_mut!(ENCODER)).end_frame(write_bytes);
    }

    unsafe fn write(bytes: &[u8]) {
        (*ptr::addr_of_mut!(ENCODER)).write(bytes, write_bytes);
    }
}

fn write_bytes(bytes: &[u8]) {
    for &byte in bytes {
        arch::debug::putchar(byte);
    }
}
