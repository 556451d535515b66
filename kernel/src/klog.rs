//! Kernel log shim. With the hardware port enabled the messages go out
//! through `defmt`; host builds swallow them.

#[cfg(feature = "cortex_m")]
macro_rules! klog {
    ($($args:tt)*) => {
        defmt::info!($($args)*)
    };
}

#[cfg(not(feature = "cortex_m"))]
macro_rules! klog {
    ($($args:tt)*) => {{
        let _ = ($($args)*);
    }};
}

pub(crate) use klog;
