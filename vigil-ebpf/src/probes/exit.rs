use super::*;
use crate::kernel;
use aya_ebpf::programs::ProbeContext;
use vigil_common::discarders;

#[kprobe(function = "do_exit")]
pub fn enter_do_exit(ctx: ProbeContext) -> u32 {
    probe_body!(&ctx, try_enter_do_exit)
}

#[inline(always)]
unsafe fn try_enter_do_exit(ctx: &ProbeContext) -> ProbeResult<()> {
    let task = CurrentTask::new(ctx);

    // span state is released even for the sensor's own tasks
    let group_dead = kernel::is_last_live_thread()?;
    maps::span_engine().on_task_exit(task.pid_tgid(), group_dead);

    if !task.is_group_leader() {
        return Ok(());
    }

    let Some(cfg) = monitored_cfg(&task)? else {
        return Ok(());
    };

    let mut sink = PerfSink::new(ctx, filter(cfg));
    maps::lineage().on_exit(&task, discarders::is_flushing(), &mut sink)
}
