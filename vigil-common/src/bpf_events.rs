use crate::consts::COMM_SIZE;
use crate::task::Task;
use crate::{bpf_target_code, not_bpf_target_code};
use vigil_macros::StrEnum;

not_bpf_target_code! {
    mod user;
    pub use user::*;
}

bpf_target_code! {
    mod bpf;
    pub use bpf::*;
}

mod events;
pub use events::*;

pub const VIGIL_EVENTS_MAP: &str = "VIGIL_EVENTS";
pub const VIGIL_STATS_MAP: &str = "VIGIL_STATS";

#[repr(u32)]
#[derive(StrEnum, Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    #[default]
    #[str("unknown")]
    Unknown = 0,

    // process lifecycle
    #[str("fork")]
    Fork,
    #[str("exec")]
    Exec,
    #[str("exit")]
    Exit,

    // Materialize the end of configurable events
    #[str("end_configurable")]
    EndConfigurable,

    #[str("log")]
    Log,

    // !!! all new event types must be put before max
    #[str("max")]
    Max,
}

impl Type {
    pub fn is_configurable(&self) -> bool {
        *self > Self::Unknown && *self < Self::EndConfigurable
    }

    #[inline(always)]
    pub const fn id(&self) -> u32 {
        *self as u32
    }

    /// Bit identifying the type in event masks
    #[inline(always)]
    pub const fn mask(&self) -> u64 {
        1 << self.id()
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::variants().into_iter().find(|t| t.id() == id)
    }
}

/// Process context of the task an event was generated for
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessContext {
    pub pid: u32,
    pub tid: u32,
    pub uid: u32,
    pub gid: u32,
    pub comm: [u8; COMM_SIZE],
}

impl ProcessContext {
    #[inline(always)]
    pub fn comm_str(&self) -> &str {
        // comm may or may not be NUL terminated
        let end = self.comm.iter().position(|&b| b == 0).unwrap_or(COMM_SIZE);
        core::str::from_utf8(&self.comm[..end]).unwrap_or_default()
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct EventInfo {
    pub etype: Type,
    pub process: ProcessContext,
    // nanoseconds since boot, not counting suspend
    pub timestamp: u64,
}

impl EventInfo {
    #[inline(always)]
    pub fn init<K: Task>(&mut self, ty: Type, task: &K) {
        self.etype = ty;
        self.process = ProcessContext {
            pid: task.tgid(),
            tid: task.tid(),
            uid: task.uid(),
            gid: task.gid(),
            comm: task.comm(),
        };
        self.timestamp = task.ktime_ns();
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct Event<T> {
    // don't move info elsewhere than in the beginning of the struct
    // the decoder relies on that offset to read EventInfo
    pub info: EventInfo,
    pub data: T,
}

impl<T> Event<T> {
    #[inline]
    pub const fn size_of() -> usize {
        core::mem::size_of::<Event<T>>()
    }

    #[inline]
    pub fn ty(&self) -> Type {
        self.info.etype
    }

    #[inline]
    pub fn encode(&self) -> &[u8] {
        unsafe {
            core::slice::from_raw_parts(
                (self as *const Self) as *const u8,
                core::mem::size_of::<Event<T>>(),
            )
        }
    }
}

/// Destination of the events produced by the hook logic.
///
/// Implementors provide zero initialized storage for the event, fill
/// its [EventInfo] from `task` and let `fill` write the event data.
/// Events of a type disabled by configuration are dropped by the sink.
pub trait EventSink {
    fn emit<K, T, F>(&mut self, ty: Type, task: &K, fill: F)
    where
        K: Task,
        F: FnOnce(&mut T);
}
