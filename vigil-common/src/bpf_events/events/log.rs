use super::super::Event;
use crate::errors::ProbeError;

pub type LogEvent = Event<LogData>;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LogData {
    pub line: u32,
    pub error: ProbeError,
}
