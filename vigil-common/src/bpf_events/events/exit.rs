use super::super::Event;
use crate::process::{ContainerId, ExecutableId, PidCacheEntry};

pub type ExitEvent = Event<ExitData>;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ExitData {
    pub pid_entry: PidCacheEntry,
    pub executable: ExecutableId,
    pub container: ContainerId,
}
