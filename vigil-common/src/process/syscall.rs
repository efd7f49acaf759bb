use crate::args::StrArrayRef;
use crate::errors::MapError;
use crate::maps::Map;

use super::ExecutableId;

/// State of an exec in flight, from syscall entry to credentials commit
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecSyscall {
    pub args: StrArrayRef,
    pub envs: StrArrayRef,
    // set once the executable file has been resolved
    pub is_parsed: bool,
    // cookie allocated for the new image
    pub cookie: u32,
    pub executable: ExecutableId,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallCache {
    Fork { is_thread: bool },
    Exec(ExecSyscall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallKind {
    Fork,
    Exec,
}

impl SyscallCache {
    #[inline(always)]
    pub fn kind(&self) -> SyscallKind {
        match self {
            Self::Fork { .. } => SyscallKind::Fork,
            Self::Exec(_) => SyscallKind::Exec,
        }
    }
}

/// Pending syscall state keyed by the pid_tgid of the calling thread
pub struct SyscallTable<M> {
    map: M,
}

impl<M: Map<u64, SyscallCache>> SyscallTable<M> {
    pub fn new(map: M) -> Self {
        Self { map }
    }

    /// Records pending state, replacing any state left behind by the thread
    #[inline(always)]
    pub fn cache(&mut self, pid_tgid: u64, s: &SyscallCache) -> Result<(), MapError> {
        self.map.insert(&pid_tgid, s)
    }

    #[inline(always)]
    pub fn peek_exec(&mut self, pid_tgid: u64) -> Option<&mut ExecSyscall> {
        match self.map.get_mut(&pid_tgid) {
            Some(SyscallCache::Exec(e)) => Some(e),
            _ => None,
        }
    }

    /// Takes the pending state only if it is of the expected kind
    #[inline(always)]
    pub fn pop(&mut self, pid_tgid: u64, kind: SyscallKind) -> Option<SyscallCache> {
        let s = match self.map.get(&pid_tgid) {
            Some(s) if s.kind() == kind => *s,
            _ => return None,
        };
        let _ = self.map.remove(&pid_tgid);
        Some(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::maps::LruMap;

    #[test]
    fn test_pop_kind() {
        let mut t = SyscallTable::new(LruMap::with_max_entries(8));
        t.cache(1, &SyscallCache::Fork { is_thread: true }).unwrap();

        assert!(t.peek_exec(1).is_none());
        assert_eq!(t.pop(1, SyscallKind::Exec), None);
        assert_eq!(
            t.pop(1, SyscallKind::Fork),
            Some(SyscallCache::Fork { is_thread: true })
        );
        // consumed at most once
        assert_eq!(t.pop(1, SyscallKind::Fork), None);
    }

    #[test]
    fn test_peek_exec() {
        let mut t = SyscallTable::new(LruMap::with_max_entries(8));
        t.cache(1, &SyscallCache::Exec(ExecSyscall::default()))
            .unwrap();

        t.peek_exec(1).unwrap().cookie = 42;
        match t.pop(1, SyscallKind::Exec) {
            Some(SyscallCache::Exec(e)) => assert_eq!(e.cookie, 42),
            s => panic!("unexpected {s:?}"),
        }
    }
}
