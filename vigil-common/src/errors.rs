use crate::bpf_target_code;
use crate::{args, span, task};

use vigil_macros::BpfError;

bpf_target_code! {
    mod bpf;
    pub use bpf::*;
}

pub const BPF_PROG_SUCCESS: u32 = 0;
pub const BPF_PROG_FAILURE: u32 = 1;

#[repr(C)]
#[derive(BpfError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    #[error("failed to insert value into map")]
    InsertFailure,
    #[error("failed to get value from map")]
    GetFailure,
    #[error("failed to remove value from map")]
    RemoveFailure,
}

impl From<MapError> for ProbeError {
    fn from(value: MapError) -> Self {
        Self::BpfMapError(value)
    }
}

// this will generate an error if ProbeError enum becomes
// too big and does not fit into a BPF register. This would
// prevent unexpected behaviour when returning Result<T, ProbeError>
const _: bool = {
    if core::mem::size_of::<ProbeError>() > core::mem::size_of::<u64>() {
        panic!("ProbeError enum does not fit into a BPF register");
    }

    if core::mem::align_of::<ProbeError>() != core::mem::align_of::<u64>() {
        panic!("ProbeError must be 8 bytes aligned")
    }
    true
};

// the verifier does not like data carrying enums holding values
// of different sizes and alignments so we are forcing them
#[repr(C, align(8))]
#[derive(BpfError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    #[error("failed to get configuration")]
    Config,
    #[error("failed to get kprobe arg")]
    KProbeArgFailure,
    #[error("failed to read kernel memory")]
    KernelRead,
    #[error("unexpected null pointer")]
    NullPointer,
    #[wrap]
    BpfMapError(MapError),
    #[wrap]
    TaskError(task::Error),
    #[wrap]
    ArgsError(args::Error),
    #[wrap]
    SpanError(span::Error),
}

pub type ProbeResult<T> = core::result::Result<T, ProbeError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrapped_description() {
        let e: ProbeError = MapError::InsertFailure.into();
        assert_eq!(e.name(), "BpfMapError");
        assert_eq!(e.description(), "failed to insert value into map");
        assert_eq!(ProbeError::NullPointer.description(), "unexpected null pointer");
    }
}
