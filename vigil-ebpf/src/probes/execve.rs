use super::*;
use crate::kernel;
use crate::vmlinux::{linux_binprm, trace_event_raw_sys_enter};
use aya_ebpf::programs::{ProbeContext, TracePointContext};

#[inline(always)]
unsafe fn sys_enter_args(ctx: &TracePointContext) -> ProbeResult<[u64; 6]> {
    let raw: trace_event_raw_sys_enter = ctx.read_at(0).map_err(|_| ProbeError::KernelRead)?;
    Ok(raw.args.map(|a| a as u64))
}

#[inline(always)]
unsafe fn exec_enter(ctx: &TracePointContext, argv: u64, envp: u64) -> ProbeResult<()> {
    let mut task = CurrentTask::new(ctx);
    if monitored_cfg(&task)?.is_none() {
        return Ok(());
    }

    let mut capture = maps::args_capture();
    maps::lineage().on_exec_syscall_enter(&mut task, &mut capture, argv, envp)
}

#[tracepoint(category = "syscalls", name = "sys_enter_execve")]
pub fn sys_enter_execve(ctx: TracePointContext) -> u32 {
    probe_body!(&ctx, try_sys_enter_execve)
}

// execve(filename, argv, envp)
#[inline(always)]
unsafe fn try_sys_enter_execve(ctx: &TracePointContext) -> ProbeResult<()> {
    let args = sys_enter_args(ctx)?;
    exec_enter(ctx, args[1], args[2])
}

#[tracepoint(category = "syscalls", name = "sys_enter_execveat")]
pub fn sys_enter_execveat(ctx: TracePointContext) -> u32 {
    probe_body!(&ctx, try_sys_enter_execveat)
}

// execveat(dirfd, filename, argv, envp, flags)
#[inline(always)]
unsafe fn try_sys_enter_execveat(ctx: &TracePointContext) -> ProbeResult<()> {
    let args = sys_enter_args(ctx)?;
    exec_enter(ctx, args[2], args[3])
}

#[kprobe(function = "security_bprm_check")]
pub fn enter_security_bprm_check(ctx: ProbeContext) -> u32 {
    probe_body!(&ctx, try_security_bprm_check)
}

#[inline(always)]
unsafe fn try_security_bprm_check(ctx: &ProbeContext) -> ProbeResult<()> {
    let mut task = CurrentTask::new(ctx);
    if monitored_cfg(&task)?.is_none() {
        return Ok(());
    }

    let bprm: *const linux_binprm = kprobe_arg!(ctx, 0)?;
    let executable = kernel::executable_id(bprm)?;

    maps::lineage().on_exec_file_open(&mut task, &executable)
}

#[kprobe(function = "security_bprm_committed_creds")]
pub fn enter_security_bprm_committed_creds(ctx: ProbeContext) -> u32 {
    probe_body!(&ctx, try_security_bprm_committed_creds)
}

#[inline(always)]
unsafe fn try_security_bprm_committed_creds(ctx: &ProbeContext) -> ProbeResult<()> {
    let task = CurrentTask::new(ctx);
    let Some(cfg) = monitored_cfg(&task)? else {
        return Ok(());
    };

    let mut capture = maps::args_capture();
    let mut sink = PerfSink::new(ctx, filter(cfg));
    maps::lineage().on_exec_commit(&task, &mut capture, &mut sink)
}

#[tracepoint(category = "syscalls", name = "sys_exit_execve")]
pub fn sys_exit_execve(ctx: TracePointContext) -> u32 {
    probe_body!(&ctx, try_sys_exit_exec)
}

#[tracepoint(category = "syscalls", name = "sys_exit_execveat")]
pub fn sys_exit_execveat(ctx: TracePointContext) -> u32 {
    probe_body!(&ctx, try_sys_exit_exec)
}

// pending state is left behind by failed executions only
#[inline(always)]
unsafe fn try_sys_exit_exec(ctx: &TracePointContext) -> ProbeResult<()> {
    maps::lineage().on_exec_syscall_exit(&CurrentTask::new(ctx));
    Ok(())
}
