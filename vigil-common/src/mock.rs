//! In memory stand-ins for the running task and the maps, used to
//! drive the hook logic from unit tests.

use std::collections::BTreeMap;

use crate::args::{self, StrBuffer};
use crate::consts::{
    ARGS_ENVS_CACHE_SIZE, COMM_SIZE, PID_CACHE_SIZE, PID_DISCARDERS_SIZE, PROC_CACHE_SIZE,
    SPAN_MAPS_SIZE, STACK_SIG_DEPTH, SYSCALL_CACHE_SIZE,
};
use crate::discarders::PidDiscarder;
use crate::maps::{LruMap, ScratchSlots};
use crate::process::{Lineage, PidCacheEntry, ProcCacheEntry, SyscallCache};
use crate::span::{CoroutineCtx, Span, SpanEngine, SpanKey, StackSignatures};
use crate::task::{Error, Task, UserMemory};

/// Sparse user address space made of independent regions
#[derive(Debug, Default, Clone)]
pub struct MockMemory {
    regions: BTreeMap<u64, Vec<u8>>,
    next: u64,
    pub stack: Vec<u64>,
}

impl MockMemory {
    const BASE: u64 = 0x1000;
    // gap left between regions so that overflows do not hit a neighbour
    const GAP: u64 = 0x100;

    pub fn put_bytes(&mut self, data: &[u8]) -> u64 {
        let addr = self.next.max(Self::BASE);
        self.regions.insert(addr, data.to_vec());
        self.next = addr + data.len() as u64 + Self::GAP;
        addr
    }

    pub fn put_str(&mut self, s: &str) -> u64 {
        let mut b = s.as_bytes().to_vec();
        b.push(0);
        self.put_bytes(&b)
    }

    /// Lays out a NULL terminated array of pointers to `strings`
    pub fn put_str_array(&mut self, strings: &[&str]) -> u64 {
        let mut array = vec![];
        for s in strings {
            array.extend_from_slice(&self.put_str(s).to_ne_bytes());
        }
        array.extend_from_slice(&0u64.to_ne_bytes());
        self.put_bytes(&array)
    }

    /// Overwrites a value within an existing region
    pub fn put_u64(&mut self, addr: u64, v: u64) {
        let (start, region) = self
            .regions
            .range_mut(..=addr)
            .next_back()
            .expect("address must be mapped");
        let off = (addr - start) as usize;
        region[off..off + 8].copy_from_slice(&v.to_ne_bytes());
    }

    fn mapped(&self, addr: u64) -> Option<&[u8]> {
        let (start, region) = self.regions.range(..=addr).next_back()?;
        region.get((addr - start) as usize..)
    }
}

#[derive(Debug, Clone)]
pub struct MockTask {
    pub pid_tgid: u64,
    pub uid_gid: u64,
    pub now: u64,
    pub comm: [u8; COMM_SIZE],
    pub mem: MockMemory,
    rand: u32,
}

impl MockTask {
    pub fn new(tgid: u32, tid: u32) -> Self {
        Self {
            pid_tgid: ((tgid as u64) << 32) | tid as u64,
            uid_gid: 0,
            now: 1,
            comm: [0; COMM_SIZE],
            mem: MockMemory::default(),
            rand: tgid ^ 0x5eed,
        }
    }

    /// Another thread of the same thread group
    pub fn thread(&self, tid: u32) -> Self {
        let mut t = self.clone();
        t.pid_tgid = (self.pid_tgid & !0xffff_ffff) | tid as u64;
        t
    }

    pub fn with_comm(mut self, comm: &str) -> Self {
        self.comm = [0; COMM_SIZE];
        let n = comm.len().min(COMM_SIZE - 1);
        self.comm[..n].copy_from_slice(&comm.as_bytes()[..n]);
        self
    }
}

impl Task for MockTask {
    fn pid_tgid(&self) -> u64 {
        self.pid_tgid
    }

    fn uid_gid(&self) -> u64 {
        self.uid_gid
    }

    fn ktime_ns(&self) -> u64 {
        self.now
    }

    fn random_u32(&mut self) -> u32 {
        // xorshift
        let mut x = self.rand.max(1);
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rand = x;
        x
    }

    fn comm(&self) -> [u8; COMM_SIZE] {
        self.comm
    }
}

impl UserMemory for MockTask {
    fn read_ptr(&self, addr: u64) -> Result<u64, Error> {
        let mut b = [0u8; 8];
        self.read_bytes(addr, &mut b)?;
        Ok(u64::from_ne_bytes(b))
    }

    fn read_bytes(&self, addr: u64, dst: &mut [u8]) -> Result<(), Error> {
        let src = self.mem.mapped(addr).ok_or(Error::UserRead)?;
        dst.copy_from_slice(src.get(..dst.len()).ok_or(Error::UserRead)?);
        Ok(())
    }

    fn read_str(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Error> {
        let src = self.mem.mapped(addr).ok_or(Error::UserRead)?;
        if dst.is_empty() {
            return Ok(0);
        }

        let len = src.iter().position(|&b| b == 0).unwrap_or(src.len());
        let n = len.min(dst.len() - 1);
        dst[..n].copy_from_slice(&src[..n]);
        dst[n] = 0;
        Ok(n + 1)
    }

    fn user_stack(&self, dst: &mut [u64; STACK_SIG_DEPTH]) -> Result<usize, Error> {
        let n = self.mem.stack.len().min(STACK_SIG_DEPTH);
        dst[..n].copy_from_slice(&self.mem.stack[..n]);
        Ok(n)
    }
}

pub type MockLineage = Lineage<
    LruMap<u32, PidCacheEntry>,
    LruMap<u32, ProcCacheEntry>,
    LruMap<u64, SyscallCache>,
    LruMap<u32, PidDiscarder>,
>;

pub fn lineage() -> MockLineage {
    Lineage::new(
        LruMap::with_max_entries(PID_CACHE_SIZE as usize),
        LruMap::with_max_entries(PROC_CACHE_SIZE as usize),
        LruMap::with_max_entries(SYSCALL_CACHE_SIZE as usize),
        LruMap::with_max_entries(PID_DISCARDERS_SIZE as usize),
    )
}

pub type ArgsCapture = args::ArgsCapture<ScratchSlots<StrBuffer>, LruMap<u32, StrBuffer>>;

pub fn args_capture() -> ArgsCapture {
    args::ArgsCapture::new(
        ScratchSlots::with_slots(2),
        LruMap::with_max_entries(ARGS_ENVS_CACHE_SIZE as usize),
    )
}

pub type MockSpanEngine = SpanEngine<
    LruMap<u32, CoroutineCtx>,
    LruMap<u64, u64>,
    LruMap<SpanKey, Span>,
    LruMap<u32, StackSignatures>,
    LruMap<u32, u64>,
>;

pub fn span_engine() -> MockSpanEngine {
    let n = SPAN_MAPS_SIZE as usize;
    SpanEngine::new(
        LruMap::with_max_entries(n),
        LruMap::with_max_entries(n),
        LruMap::with_max_entries(n),
        LruMap::with_max_entries(n),
        LruMap::with_max_entries(n),
    )
}
