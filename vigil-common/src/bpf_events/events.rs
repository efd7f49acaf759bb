mod exec;
mod exit;
mod fork;
mod log;

pub use exec::*;
pub use exit::*;
pub use fork::*;
pub use log::*;
