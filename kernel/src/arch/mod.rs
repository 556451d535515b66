#[cfg(feature = "cortex_m")]
pub mod cortex_m;
#[cfg(not(feature = "cortex_m"))]
pub mod dummy;

#[cfg(feature = "cortex_m")]
pub use self::cortex_m::*;
#[cfg(not(feature = "cortex_m"))]
pub use dummy::*;
