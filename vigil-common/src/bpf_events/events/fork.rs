use super::super::Event;
use crate::process::{PidCacheEntry, ProcCacheEntry};

pub type ForkEvent = Event<ForkData>;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForkData {
    pub child_pid: u32,
    // entry created for the child
    pub pid_entry: PidCacheEntry,
    // copy of the parent's process context
    pub proc_entry: ProcCacheEntry,
}
