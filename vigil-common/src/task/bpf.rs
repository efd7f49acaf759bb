use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_uid_gid,
        bpf_ktime_get_ns, bpf_probe_read_user, bpf_probe_read_user_buf,
        bpf_probe_read_user_str_bytes,
        generated::{bpf_get_prandom_u32, bpf_get_stack},
    },
    EbpfContext,
};

use super::{Error, Task, UserMemory};
use crate::consts::{COMM_SIZE, STACK_SIG_DEPTH};

const BPF_F_USER_STACK: u64 = 1 << 8;

/// The task the eBPF program is currently running for
pub struct CurrentTask<'a, C: EbpfContext> {
    ctx: &'a C,
}

impl<'a, C: EbpfContext> CurrentTask<'a, C> {
    #[inline(always)]
    pub fn new(ctx: &'a C) -> Self {
        Self { ctx }
    }
}

impl<C: EbpfContext> Task for CurrentTask<'_, C> {
    #[inline(always)]
    fn pid_tgid(&self) -> u64 {
        bpf_get_current_pid_tgid()
    }

    #[inline(always)]
    fn uid_gid(&self) -> u64 {
        bpf_get_current_uid_gid()
    }

    #[inline(always)]
    fn ktime_ns(&self) -> u64 {
        unsafe { bpf_ktime_get_ns() }
    }

    #[inline(always)]
    fn random_u32(&mut self) -> u32 {
        unsafe { bpf_get_prandom_u32() }
    }

    #[inline(always)]
    fn comm(&self) -> [u8; COMM_SIZE] {
        bpf_get_current_comm().unwrap_or([0; COMM_SIZE])
    }
}

impl<C: EbpfContext> UserMemory for CurrentTask<'_, C> {
    #[inline(always)]
    fn read_ptr(&self, addr: u64) -> Result<u64, Error> {
        unsafe { bpf_probe_read_user(addr as *const u64) }.map_err(|_| Error::UserRead)
    }

    #[inline(always)]
    fn read_bytes(&self, addr: u64, dst: &mut [u8]) -> Result<(), Error> {
        unsafe { bpf_probe_read_user_buf(addr as *const u8, dst) }.map_err(|_| Error::UserRead)
    }

    #[inline(always)]
    fn read_str(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Error> {
        unsafe { bpf_probe_read_user_str_bytes(addr as *const u8, dst) }
            .map(|s| s.len() + 1)
            .map_err(|_| Error::UserRead)
    }

    #[inline(always)]
    fn user_stack(&self, dst: &mut [u64; STACK_SIG_DEPTH]) -> Result<usize, Error> {
        let size = core::mem::size_of_val(dst) as u32;
        let ret = unsafe {
            bpf_get_stack(
                self.ctx.as_ptr(),
                dst.as_mut_ptr() as *mut _,
                size,
                BPF_F_USER_STACK,
            )
        };

        if ret < 0 {
            return Err(Error::UserStack);
        }

        Ok(ret as usize / core::mem::size_of::<u64>())
    }
}
