use super::*;
use aya_ebpf::programs::ProbeContext;
use vigil_common::erpc::{self, ERPC_IOCTL_CMD};

#[kprobe(function = "do_vfs_ioctl")]
pub fn enter_do_vfs_ioctl(ctx: ProbeContext) -> u32 {
    probe_body!(&ctx, try_enter_do_vfs_ioctl)
}

#[inline(always)]
unsafe fn try_enter_do_vfs_ioctl(ctx: &ProbeContext) -> ProbeResult<()> {
    // do_vfs_ioctl(filp, fd, cmd, arg)
    let cmd: u32 = kprobe_arg!(ctx, 2)?;
    if cmd != ERPC_IOCTL_CMD {
        return Ok(());
    }
    let arg: u64 = kprobe_arg!(ctx, 3)?;

    let task = CurrentTask::new(ctx);
    let req = maps::span_request().ok_or(MapError::GetFailure)?;

    // rejected requests are dropped silently, the caller must not learn
    // why its request was refused
    let mut spans = maps::span_engine();
    match erpc::handle_ioctl(&mut spans, maps::pid_discarders(), &task, cmd, arg, req) {
        Err(ProbeError::SpanError(_)) => Ok(()),
        r => r,
    }
}
