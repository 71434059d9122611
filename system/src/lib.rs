mod arch;
mod hardware;
mod platform;

pub use crate::arch::*;
pub use crate::hardware::*;
pub use crate::platform::*;
