use aya_ebpf::{macros::map, maps::LruPerCpuHashMap, EbpfContext};

use super::ProbeError;
use crate::bpf_events::{pipe_event, LogEvent, Type};
use crate::task::CurrentTask;

// staging area, a LogEvent would not fit on the stack
// of some of the probes calling the logging macro
#[map]
pub static mut LOGS: LruPerCpuHashMap<u32, LogEvent> = LruPerCpuHashMap::with_max_entries(16, 0);

const SIZE: usize = core::mem::size_of::<LogEvent>();
static EMPTY_LOG: [u8; SIZE] = [0; SIZE];

#[inline(always)]
pub unsafe fn log_error<C: EbpfContext>(ctx: &C, line: u32, error: ProbeError) {
    let _ = LOGS.insert(&0, &(*(EMPTY_LOG.as_ptr() as *const LogEvent)), 0);
    if let Some(e) = LOGS.get_ptr_mut(&0) {
        let e = &mut *e;
        e.info.init(Type::Log, &CurrentTask::new(ctx));
        e.data.line = line;
        e.data.error = error;

        pipe_event(ctx, e);
    }
}

/// Sends a [ProbeError] to userland as a log event, tagged with
/// the line it was raised at
#[macro_export]
macro_rules! log_err {
    ($ctx:expr, $err:expr) => {
        unsafe { $crate::errors::log_error($ctx, core::line!(), $err) }
    };
}
