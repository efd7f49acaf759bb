use aya_ebpf::{
    macros::map,
    maps::{LruHashMap, PerCpuArray},
};
use vigil_common::{
    args::{ArgsCapture, StrBuffer},
    consts::*,
    discarders::{PidDiscarder, PID_DISCARDERS},
    process::{Lineage, PidCacheEntry, ProcCacheEntry, SyscallCache},
    span::{CoroutineCtx, Span, SpanEngine, SpanKey, SpanRequest, StackSignatures},
};

type Lru<K, V> = &'static mut LruHashMap<K, V>;

#[map]
static mut PID_CACHE: LruHashMap<u32, PidCacheEntry> =
    LruHashMap::with_max_entries(PID_CACHE_SIZE, 0);

#[map]
static mut PROC_CACHE: LruHashMap<u32, ProcCacheEntry> =
    LruHashMap::with_max_entries(PROC_CACHE_SIZE, 0);

#[map]
static mut SYSCALL_CACHE: LruHashMap<u64, SyscallCache> =
    LruHashMap::with_max_entries(SYSCALL_CACHE_SIZE, 0);

// userland fetches complete argument arrays from there
#[map]
static mut ARGS_ENVS_CACHE: LruHashMap<u32, StrBuffer> =
    LruHashMap::with_max_entries(ARGS_ENVS_CACHE_SIZE, 0);

// one buffer for args and one for envs
#[map]
static mut STR_BUFFERS: PerCpuArray<StrBuffer> = PerCpuArray::with_max_entries(2, 0);

#[map]
static mut COROUTINE_CTX: LruHashMap<u32, CoroutineCtx> =
    LruHashMap::with_max_entries(SPAN_MAPS_SIZE, 0);

#[map]
static mut COROUTINE_IDS: LruHashMap<u64, u64> = LruHashMap::with_max_entries(SPAN_MAPS_SIZE, 0);

#[map]
static mut SPAN_IDS: LruHashMap<SpanKey, Span> = LruHashMap::with_max_entries(SPAN_MAPS_SIZE, 0);

#[map]
static mut STACK_TRACE_SIGNATURES: LruHashMap<u32, StackSignatures> =
    LruHashMap::with_max_entries(SPAN_MAPS_SIZE, 0);

#[map]
static mut SECRET_TOKENS: LruHashMap<u32, u64> = LruHashMap::with_max_entries(SPAN_MAPS_SIZE, 0);

#[map]
static mut SPAN_REQUESTS: PerCpuArray<SpanRequest> = PerCpuArray::with_max_entries(1, 0);

pub type BpfLineage = Lineage<
    Lru<u32, PidCacheEntry>,
    Lru<u32, ProcCacheEntry>,
    Lru<u64, SyscallCache>,
    Lru<u32, PidDiscarder>,
>;

pub type BpfArgsCapture = ArgsCapture<&'static mut PerCpuArray<StrBuffer>, Lru<u32, StrBuffer>>;

pub type BpfSpanEngine = SpanEngine<
    Lru<u32, CoroutineCtx>,
    Lru<u64, u64>,
    Lru<SpanKey, Span>,
    Lru<u32, StackSignatures>,
    Lru<u32, u64>,
>;

#[inline(always)]
pub unsafe fn lineage() -> BpfLineage {
    Lineage::new(
        &mut PID_CACHE,
        &mut PROC_CACHE,
        &mut SYSCALL_CACHE,
        &mut PID_DISCARDERS,
    )
}

#[inline(always)]
pub unsafe fn args_capture() -> BpfArgsCapture {
    ArgsCapture::new(&mut STR_BUFFERS, &mut ARGS_ENVS_CACHE)
}

#[inline(always)]
pub unsafe fn span_engine() -> BpfSpanEngine {
    SpanEngine::new(
        &mut COROUTINE_CTX,
        &mut COROUTINE_IDS,
        &mut SPAN_IDS,
        &mut STACK_TRACE_SIGNATURES,
        &mut SECRET_TOKENS,
    )
}

#[inline(always)]
pub unsafe fn pid_discarders() -> Lru<u32, PidDiscarder> {
    &mut PID_DISCARDERS
}

/// Per-CPU storage span requests are read into
#[inline(always)]
pub unsafe fn span_request() -> Option<&'static mut SpanRequest> {
    SPAN_REQUESTS.get_ptr_mut(0).map(|p| &mut *p)
}
