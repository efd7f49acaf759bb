use super::super::Event;
use crate::args::PerfStrBuffer;
use crate::process::{PidCacheEntry, ProcCacheEntry};

pub type ExecEvent = Event<ExecData>;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ExecData {
    pub pid_entry: PidCacheEntry,
    pub proc_entry: ProcCacheEntry,
    pub args: PerfStrBuffer,
    pub envs: PerfStrBuffer,
}
