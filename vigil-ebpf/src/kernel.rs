use core::ptr::addr_of;

use aya_ebpf::helpers::{bpf_get_current_task, bpf_probe_read_kernel};
use vigil_common::consts::TTY_NAME_LEN;
use vigil_common::errors::{ProbeError, ProbeResult};
use vigil_common::process::ExecutableId;

use crate::vmlinux::{file, inode, kernel_clone_args, linux_binprm, mount, task_struct, vfsmount};

/// Reads a field behind a kernel pointer
macro_rules! read_kernel {
    ($place:expr) => {
        bpf_probe_read_kernel(addr_of!($place)).map_err(|_| ProbeError::KernelRead)
    };
}

#[inline(always)]
fn non_null<T>(p: *const T) -> ProbeResult<*const T> {
    if p.is_null() {
        return Err(ProbeError::NullPointer);
    }
    Ok(p)
}

#[inline(always)]
pub unsafe fn clone_flags(args: *const kernel_clone_args) -> ProbeResult<u64> {
    let args = non_null(args)?;
    read_kernel!((*args).flags)
}

/// Identity of the file being executed
#[inline(always)]
pub unsafe fn executable_id(bprm: *const linux_binprm) -> ProbeResult<ExecutableId> {
    let bprm = non_null(bprm)?;
    let file = non_null(read_kernel!((*bprm).file)? as *const file)?;
    let inode = non_null(read_kernel!((*file).f_inode)? as *const inode)?;
    let vfsmnt = non_null(read_kernel!((*file).f_path.mnt)? as *const vfsmount)?;

    // a vfsmount is embedded in its mount
    let mnt = (vfsmnt as *const u8).sub(core::mem::offset_of!(mount, mnt)) as *const mount;

    Ok(ExecutableId {
        inode: read_kernel!((*inode).i_ino)? as u64,
        mount_id: read_kernel!((*mnt).mnt_id)? as u32,
        ..Default::default()
    })
}

/// Name of the controlling tty of the current task, all zero when
/// the task has none
#[inline(always)]
pub unsafe fn current_tty_name() -> ProbeResult<[u8; TTY_NAME_LEN]> {
    let task = non_null(bpf_get_current_task() as *const task_struct)?;
    let signal = read_kernel!((*task).signal)?;
    if signal.is_null() {
        return Ok([0; TTY_NAME_LEN]);
    }

    let tty = read_kernel!((*signal).tty)?;
    if tty.is_null() {
        return Ok([0; TTY_NAME_LEN]);
    }

    bpf_probe_read_kernel(addr_of!((*tty).name) as *const [u8; TTY_NAME_LEN])
        .map_err(|_| ProbeError::KernelRead)
}

/// Whether the current task is the last live thread of its group. On
/// do_exit entry the exiting task is still accounted in signal->live.
#[inline(always)]
pub unsafe fn is_last_live_thread() -> ProbeResult<bool> {
    let task = non_null(bpf_get_current_task() as *const task_struct)?;
    let signal = non_null(read_kernel!((*task).signal)?)?;
    Ok(read_kernel!((*signal).live.counter)? <= 1)
}
