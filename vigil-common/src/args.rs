//! Capture of NULL terminated arrays of user strings (argv, envp).
//!
//! Elements are written into a per-CPU scratch [StrBuffer] as a little
//! endian `u32` length followed by the string bytes (no NUL). Elements
//! all start below [STR_BUFF_WRAP], the capture stops and is flagged
//! truncated once no more element fits. Offsets are still taken modulo
//! [STR_BUFF_WRAP] so that the eBPF verifier sees every write in bounds.
//! The buffer is then snapshot into an LRU cache under a random id.

use crate::consts::{
    MAX_ARRAY_ELEMENT, MAX_ARRAY_ELEMENT_SIZE, MAX_PERF_STR_BUFF_LEN, MAX_STR_BUFF_LEN,
    STR_BUFF_WRAP,
};
use crate::errors::ProbeError;
use crate::maps::{Map, Scratch};
use crate::not_bpf_target_code;
use crate::task::{Task, UserMemory};

use vigil_macros::BpfError;

not_bpf_target_code! {
    mod user;
    pub use user::*;
}

pub const ARGS_ENVS_CACHE_MAP: &str = "ARGS_ENVS_CACHE";

const LEN_SIZE: usize = core::mem::size_of::<u32>();

#[repr(C)]
#[derive(BpfError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("scratch buffer is not available")]
    ScratchUnavailable,
    #[error("failed to cache string array")]
    CacheFailure,
}

impl From<Error> for ProbeError {
    fn from(value: Error) -> Self {
        Self::ArgsError(value)
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct StrBuffer {
    // logical number of bytes written, wrapping included
    pub len: u32,
    pub count: u32,
    pub value: [u8; MAX_STR_BUFF_LEN],
}

impl Default for StrBuffer {
    fn default() -> Self {
        Self {
            len: 0,
            count: 0,
            value: [0; MAX_STR_BUFF_LEN],
        }
    }
}

/// Reference to a captured string array, travels with the pending
/// exec state instead of the (large) buffer itself
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StrArrayRef {
    pub id: u32,
    pub count: u32,
    pub truncated: bool,
}

/// Leading bytes of a captured string array sent within events
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PerfStrBuffer {
    // id of the complete buffer in the args/envs cache
    pub id: u32,
    // number of elements of the complete buffer
    pub count: u32,
    // number of meaningful bytes in value
    pub size: u32,
    pub truncated: bool,
    pub value: [u8; MAX_PERF_STR_BUFF_LEN],
}

impl Default for PerfStrBuffer {
    fn default() -> Self {
        Self {
            id: 0,
            count: 0,
            size: 0,
            truncated: false,
            value: [0; MAX_PERF_STR_BUFF_LEN],
        }
    }
}

/// Argument/environment capture state: per-CPU scratch buffers and
/// the cache complete captures are kept in.
pub struct ArgsCapture<S, C> {
    pub scratch: S,
    pub cache: C,
}

impl<S, C> ArgsCapture<S, C>
where
    S: Scratch<StrBuffer>,
    C: Map<u32, StrBuffer>,
{
    pub fn new(scratch: S, cache: C) -> Self {
        Self { scratch, cache }
    }

    /// Walks the user array at `array` into scratch `slot` and caches the
    /// result. A NULL array produces an empty capture.
    pub fn capture<K>(&mut self, task: &mut K, slot: u32, array: u64) -> Result<StrArrayRef, ProbeError>
    where
        K: Task + UserMemory,
    {
        let buf = self.scratch.slot(slot).ok_or(Error::ScratchUnavailable)?;

        buf.len = 0;
        buf.count = 0;

        let mut off = 0usize;
        let mut count = 0u32;
        let mut truncated = false;

        if array != 0 {
            for i in 0..MAX_ARRAY_ELEMENT {
                let ptr = match task.read_ptr(array + (i * 8) as u64) {
                    Ok(p) if p != 0 => p,
                    _ => break,
                };

                // an element written further would overwrite the first ones
                if off + LEN_SIZE >= STR_BUFF_WRAP {
                    truncated = true;
                    break;
                }

                let len_off = off % STR_BUFF_WRAP;
                let data_off = (off + LEN_SIZE) % STR_BUFF_WRAP;

                let n = match task.read_str(
                    ptr,
                    &mut buf.value[data_off..data_off + MAX_ARRAY_ELEMENT_SIZE],
                ) {
                    Ok(n) if n > 0 => n,
                    _ => break,
                };

                // the terminating NUL is not kept
                let elt_len = n - 1;
                buf.value[len_off..len_off + LEN_SIZE]
                    .copy_from_slice(&(elt_len as u32).to_le_bytes());

                off += LEN_SIZE + elt_len;
                count += 1;
            }

            // we only flag truncation if something got left behind
            if count as usize == MAX_ARRAY_ELEMENT {
                truncated = matches!(
                    task.read_ptr(array + (MAX_ARRAY_ELEMENT * 8) as u64),
                    Ok(p) if p != 0
                );
            }
        }

        buf.len = off as u32;
        buf.count = count;

        let id = task.random_u32();
        self.cache
            .insert(&id, buf)
            .map_err(|_| Error::CacheFailure)?;

        Ok(StrArrayRef {
            id,
            count,
            truncated,
        })
    }

    /// Builds the event preview of a cached capture. A capture evicted in
    /// the meantime yields an empty preview still carrying the reference.
    pub fn preview(&mut self, r: &StrArrayRef) -> PerfStrBuffer {
        let mut p = PerfStrBuffer {
            id: r.id,
            count: r.count,
            truncated: r.truncated,
            ..Default::default()
        };

        if let Some(buf) = self.cache.get(&r.id) {
            // preview is shorter than the wrapping offset so the
            // beginning of the buffer is linear
            let size = core::cmp::min(buf.len as usize, MAX_PERF_STR_BUFF_LEN);
            p.value.copy_from_slice(&buf.value[..MAX_PERF_STR_BUFF_LEN]);
            p.size = size as u32;
        }

        p
    }
}
