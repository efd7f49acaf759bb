use aya_ebpf::{
    macros::map,
    maps::{Array, LruHashMap},
};

use super::PidDiscarder;
use crate::consts::PID_DISCARDERS_SIZE;

#[map]
pub static mut PID_DISCARDERS: LruHashMap<u32, PidDiscarder> =
    LruHashMap::with_max_entries(PID_DISCARDERS_SIZE, 0);

#[map]
static mut FLUSHING_DISCARDERS: Array<u32> = Array::with_max_entries(1, 0);

/// Whether userland is currently flushing the discarders
#[inline(always)]
pub unsafe fn is_flushing() -> bool {
    matches!(FLUSHING_DISCARDERS.get(0), Some(&v) if v != 0)
}
