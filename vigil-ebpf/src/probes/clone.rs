use super::*;
use crate::kernel;
use crate::vmlinux::trace_event_raw_sched_process_fork;
use aya_ebpf::programs::{ProbeContext, TracePointContext};

#[kprobe(function = "kernel_clone")]
pub fn enter_kernel_clone(ctx: ProbeContext) -> u32 {
    probe_body!(&ctx, try_enter_kernel_clone)
}

#[inline(always)]
unsafe fn try_enter_kernel_clone(ctx: &ProbeContext) -> ProbeResult<()> {
    let task = CurrentTask::new(ctx);
    if monitored_cfg(&task)?.is_none() {
        return Ok(());
    }

    let flags = kernel::clone_flags(kprobe_arg!(ctx, 0)?)?;
    maps::lineage().on_fork_entry(&task, flags)
}

#[tracepoint(category = "sched", name = "sched_process_fork")]
pub fn sched_process_fork(ctx: TracePointContext) -> u32 {
    probe_body!(&ctx, try_sched_process_fork)
}

#[inline(always)]
unsafe fn try_sched_process_fork(ctx: &TracePointContext) -> ProbeResult<()> {
    let task = CurrentTask::new(ctx);
    let Some(cfg) = monitored_cfg(&task)? else {
        return Ok(());
    };

    let raw: trace_event_raw_sched_process_fork =
        ctx.read_at(0).map_err(|_| ProbeError::KernelRead)?;

    let mut sink = PerfSink::new(ctx, filter(cfg));
    maps::lineage().on_sched_fork(&task, raw.child_pid as u32, &mut sink)
}
