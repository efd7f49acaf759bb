use super::*;
use crate::kernel;
use aya_ebpf::programs::ProbeContext;

// called in the exec path once the new program is committed, at this
// point the task still holds its controlling terminal
#[kprobe(function = "exit_itimers")]
pub fn enter_exit_itimers(ctx: ProbeContext) -> u32 {
    probe_body!(&ctx, try_enter_exit_itimers)
}

#[inline(always)]
unsafe fn try_enter_exit_itimers(ctx: &ProbeContext) -> ProbeResult<()> {
    let task = CurrentTask::new(ctx);
    if monitored_cfg(&task)?.is_none() {
        return Ok(());
    }

    let tty_name = kernel::current_tty_name()?;
    maps::lineage().on_tty(&task, &tty_name);
    Ok(())
}
