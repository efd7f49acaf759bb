use crate::bpf_target_code;
use crate::consts::{COMM_SIZE, STACK_SIG_DEPTH};
use crate::errors::ProbeError;

use vigil_macros::BpfError;

bpf_target_code! {
    mod bpf;
    pub use bpf::*;
}

#[repr(C)]
#[derive(BpfError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("failed to read user memory")]
    UserRead,
    #[error("failed to read user stack")]
    UserStack,
}

impl From<Error> for ProbeError {
    fn from(value: Error) -> Self {
        Self::TaskError(value)
    }
}

/// View over the task a hook is running on behalf of
pub trait Task {
    /// tgid in the upper 32 bits, thread id in the lower ones
    fn pid_tgid(&self) -> u64;

    /// gid in the upper 32 bits, uid in the lower ones
    fn uid_gid(&self) -> u64;

    /// nanoseconds since boot
    fn ktime_ns(&self) -> u64;

    fn random_u32(&mut self) -> u32;

    fn comm(&self) -> [u8; COMM_SIZE];

    #[inline(always)]
    fn tgid(&self) -> u32 {
        (self.pid_tgid() >> 32) as u32
    }

    #[inline(always)]
    fn tid(&self) -> u32 {
        self.pid_tgid() as u32
    }

    #[inline(always)]
    fn uid(&self) -> u32 {
        self.uid_gid() as u32
    }

    #[inline(always)]
    fn gid(&self) -> u32 {
        (self.uid_gid() >> 32) as u32
    }

    #[inline(always)]
    fn is_group_leader(&self) -> bool {
        self.tgid() == self.tid()
    }
}

/// Access to the address space of the current task
pub trait UserMemory {
    fn read_ptr(&self, addr: u64) -> Result<u64, Error>;

    /// Fills the whole `dst` with the bytes found at `addr`
    fn read_bytes(&self, addr: u64, dst: &mut [u8]) -> Result<(), Error>;

    /// Copies the NUL terminated string found at `addr` into `dst`, at most
    /// `dst.len()` bytes. The returned count includes the terminating NUL,
    /// which is always written, so a read of an empty string returns 1.
    fn read_str(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Error>;

    /// Fills `dst` with the innermost return addresses of the user stack
    /// and returns how many of them were retrieved.
    fn user_stack(&self, dst: &mut [u64; STACK_SIG_DEPTH]) -> Result<usize, Error>;
}
