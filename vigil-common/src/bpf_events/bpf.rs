use aya_ebpf::{
    macros::map,
    maps::{HashMap, LruPerCpuHashMap, PerfEventByteArray},
    EbpfContext,
};

use super::{Event, EventSink, Type};
use crate::config::Filter;
use crate::task::Task;

const EVENT_STORAGE_SIZE: usize = 1024;

#[repr(C, align(8))]
pub struct EventStorage([u8; EVENT_STORAGE_SIZE]);

static EMPTY_STORAGE: EventStorage = EventStorage([0; EVENT_STORAGE_SIZE]);

#[map(name = "VIGIL_EVENTS")]
static mut EVENTS: PerfEventByteArray = PerfEventByteArray::with_max_entries(0x1ffff, 0);

#[map(name = "VIGIL_STATS")]
static mut STATS: HashMap<Type, u64> = HashMap::with_max_entries(Type::Max as u32, 0);

// events are too large for the eBPF stack so they are built there
#[map]
static mut EVENT_STAGING: LruPerCpuHashMap<u32, EventStorage> =
    LruPerCpuHashMap::with_max_entries(16, 0);

#[inline(always)]
pub unsafe fn pipe_event<C: EbpfContext, T>(ctx: &C, e: &Event<T>) {
    match STATS.get_ptr_mut(&e.ty()) {
        Some(e) => *e += 1,
        None => {
            // we ignore results
            let _ = STATS.insert(&e.ty(), &1, 0);
        }
    }
    EVENTS.output(ctx, e.encode(), 0);
}

/// [EventSink] sending events to userland through the perf event array
pub struct PerfSink<'a, C: EbpfContext> {
    ctx: &'a C,
    filter: &'a Filter,
}

impl<'a, C: EbpfContext> PerfSink<'a, C> {
    #[inline(always)]
    pub fn new(ctx: &'a C, filter: &'a Filter) -> Self {
        Self { ctx, filter }
    }
}

impl<C: EbpfContext> EventSink for PerfSink<'_, C> {
    #[inline(always)]
    fn emit<K, T, F>(&mut self, ty: Type, task: &K, fill: F)
    where
        K: Task,
        F: FnOnce(&mut T),
    {
        if self.filter.is_disabled(ty) || Event::<T>::size_of() > EVENT_STORAGE_SIZE {
            return;
        }

        unsafe {
            // zeroing the staging slot
            let _ = EVENT_STAGING.insert(&0, &EMPTY_STORAGE, 0);
            if let Some(p) = EVENT_STAGING.get_ptr_mut(&0) {
                let e = &mut *(p as *mut Event<T>);
                e.info.init(ty, task);
                fill(&mut e.data);
                pipe_event(self.ctx, e);
            }
        }
    }
}
