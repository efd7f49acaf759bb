//! Process lineage cache.
//!
//! Every live thread group is tracked through a [PidCacheEntry] keyed by
//! tgid, which points to a [ProcCacheEntry] through a random cookie
//! allocated at each exec. Forked children share the cookie of their
//! parent until they exec, so the executable and container context of a
//! process is stored once per image and never recomputed.

use crate::args::{ArgsCapture, StrBuffer};
use crate::bpf_events::{EventSink, ExecData, ExitData, ForkData, Type};
use crate::consts::{
    ARGS_BUFFER_KEY, CLONE_THREAD, COMM_SIZE, CONTAINER_ID_LEN, ENVS_BUFFER_KEY, TTY_NAME_LEN,
};
use crate::discarders::{is_discarded, PidDiscarder};
use crate::errors::ProbeResult;
use crate::maps::{Map, Scratch};
use crate::task::{Task, UserMemory};
use crate::test_flag;

mod syscall;
pub use syscall::*;

pub const PID_CACHE_MAP: &str = "PID_CACHE";
pub const PROC_CACHE_MAP: &str = "PROC_CACHE";
pub const SYSCALL_CACHE_MAP: &str = "SYSCALL_CACHE";

#[inline(always)]
fn nul_terminated_str(b: &[u8]) -> &str {
    let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
    core::str::from_utf8(&b[..end]).unwrap_or_default()
}

/// Identity of an executable file. `overlay_numlower` and `path_id`
/// are filled by the path resolution logic when available.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutableId {
    pub inode: u64,
    pub mount_id: u32,
    pub overlay_numlower: u32,
    pub path_id: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerId {
    pub id: [u8; CONTAINER_ID_LEN],
}

impl Default for ContainerId {
    fn default() -> Self {
        Self {
            id: [0; CONTAINER_ID_LEN],
        }
    }
}

impl ContainerId {
    /// Builds a container id out of `s`, keeping room for a NUL byte
    pub fn new(s: &[u8]) -> Self {
        let mut c = Self::default();
        let n = s.len().min(CONTAINER_ID_LEN - 1);
        c.id[..n].copy_from_slice(&s[..n]);
        c
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.id[0] == 0
    }

    pub fn as_str(&self) -> &str {
        nul_terminated_str(&self.id)
    }
}

/// Context shared by all the processes running the same image
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcCacheEntry {
    pub executable: ExecutableId,
    pub container: ContainerId,
    pub exec_timestamp: u64,
    pub comm: [u8; COMM_SIZE],
    pub tty_name: [u8; TTY_NAME_LEN],
}

impl Default for ProcCacheEntry {
    fn default() -> Self {
        Self {
            executable: ExecutableId::default(),
            container: ContainerId::default(),
            exec_timestamp: 0,
            comm: [0; COMM_SIZE],
            tty_name: [0; TTY_NAME_LEN],
        }
    }
}

impl ProcCacheEntry {
    pub fn comm_str(&self) -> &str {
        nul_terminated_str(&self.comm)
    }

    pub fn tty_str(&self) -> &str {
        nul_terminated_str(&self.tty_name)
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PidCacheEntry {
    pub cookie: u32,
    pub ppid: u32,
    pub fork_timestamp: u64,
    pub exit_timestamp: u64,
    pub uid: u32,
    pub gid: u32,
}

/// The lineage maps and the hook logic maintaining them. Cache misses
/// never fail a hook, they only leave events with a blank context.
pub struct Lineage<P, C, S, D> {
    pub pids: P,
    pub procs: C,
    pub syscalls: SyscallTable<S>,
    pub discarders: D,
}

impl<P, C, S, D> Lineage<P, C, S, D>
where
    P: Map<u32, PidCacheEntry>,
    C: Map<u32, ProcCacheEntry>,
    S: Map<u64, SyscallCache>,
    D: Map<u32, PidDiscarder>,
{
    pub fn new(pids: P, procs: C, syscalls: S, discarders: D) -> Self {
        Self {
            pids,
            procs,
            syscalls: SyscallTable::new(syscalls),
            discarders,
        }
    }

    /// Process context of `pid`, if both cache levels still know it
    pub fn resolve(&mut self, pid: u32) -> Option<ProcCacheEntry> {
        let cookie = self.pids.get(&pid)?.cookie;
        self.procs.get(&cookie).copied()
    }

    /// Records whether the task about to be created is a thread or a process
    #[inline(always)]
    pub fn on_fork_entry<K: Task>(&mut self, task: &K, clone_flags: u64) -> ProbeResult<()> {
        let is_thread = test_flag!(clone_flags, CLONE_THREAD);
        self.syscalls
            .cache(task.pid_tgid(), &SyscallCache::Fork { is_thread })?;
        Ok(())
    }

    /// Runs in the context of the parent once the child task exists
    #[inline(always)]
    pub fn on_sched_fork<K, E>(&mut self, task: &K, child_pid: u32, sink: &mut E) -> ProbeResult<()>
    where
        K: Task,
        E: EventSink,
    {
        // no marker means we missed the clone entry, we consider it is a process
        if let Some(SyscallCache::Fork { is_thread: true }) =
            self.syscalls.pop(task.pid_tgid(), SyscallKind::Fork)
        {
            return Ok(());
        }

        let ppid = task.tgid();
        let now = task.ktime_ns();

        let mut child = PidCacheEntry {
            ppid,
            fork_timestamp: now,
            uid: task.uid(),
            gid: task.gid(),
            ..Default::default()
        };

        if let Some(parent) = self.pids.get(&ppid) {
            child.cookie = parent.cookie;
            child.uid = parent.uid;
            child.gid = parent.gid;
        }

        self.pids.insert(&child_pid, &child)?;

        if is_discarded(&mut self.discarders, ppid, Type::Fork, now) {
            return Ok(());
        }

        let procs = &mut self.procs;
        sink.emit(Type::Fork, task, |d: &mut ForkData| {
            d.child_pid = child_pid;
            d.pid_entry = child;
            if let Some(p) = procs.get(&child.cookie) {
                d.proc_entry = *p;
            }
        });

        Ok(())
    }

    /// Captures argv and envp and caches the pending exec state
    #[inline(always)]
    pub fn on_exec_syscall_enter<K, SS, AC>(
        &mut self,
        task: &mut K,
        capture: &mut ArgsCapture<SS, AC>,
        argv: u64,
        envp: u64,
    ) -> ProbeResult<()>
    where
        K: Task + UserMemory,
        SS: Scratch<StrBuffer>,
        AC: Map<u32, StrBuffer>,
    {
        let args = capture.capture(task, ARGS_BUFFER_KEY, argv)?;
        let envs = capture.capture(task, ENVS_BUFFER_KEY, envp)?;

        self.syscalls.cache(
            task.pid_tgid(),
            &SyscallCache::Exec(ExecSyscall {
                args,
                envs,
                ..Default::default()
            }),
        )?;

        Ok(())
    }

    /// Creates the context of the image being executed. The pid entry is
    /// left alone until the exec is committed.
    #[inline(always)]
    pub fn on_exec_file_open<K: Task>(
        &mut self,
        task: &mut K,
        executable: &ExecutableId,
    ) -> ProbeResult<()> {
        let pid_tgid = task.pid_tgid();

        // the file check hook runs for every interpreter as well
        match self.syscalls.peek_exec(pid_tgid) {
            Some(e) if !e.is_parsed => {}
            _ => return Ok(()),
        }

        let cookie = task.random_u32();
        let mut entry = ProcCacheEntry {
            executable: *executable,
            exec_timestamp: task.ktime_ns(),
            comm: task.comm(),
            ..Default::default()
        };

        // container and tty survive exec
        if let Some(prev_cookie) = self.pids.get(&task.tgid()).map(|p| p.cookie) {
            if let Some(prev) = self.procs.get(&prev_cookie) {
                entry.container = prev.container;
                entry.tty_name = prev.tty_name;
            }
        }

        self.procs.insert(&cookie, &entry)?;

        if let Some(e) = self.syscalls.peek_exec(pid_tgid) {
            e.is_parsed = true;
            e.cookie = cookie;
            e.executable = *executable;
        }

        // a thread going through exec takes the identity of the leader
        // before credentials are committed, the state follows
        if !task.is_group_leader() {
            if let Some(exec) = self.syscalls.pop(pid_tgid, SyscallKind::Exec) {
                let tgid = task.tgid() as u64;
                self.syscalls.cache((tgid << 32) | tgid, &exec)?;
            }
        }

        Ok(())
    }

    /// Binds the task to the context of its new image and emits the exec.
    /// Re-delivery finds no pending state and is a no-op.
    #[inline(always)]
    pub fn on_exec_commit<K, SS, AC, E>(
        &mut self,
        task: &K,
        capture: &mut ArgsCapture<SS, AC>,
        sink: &mut E,
    ) -> ProbeResult<()>
    where
        K: Task,
        SS: Scratch<StrBuffer>,
        AC: Map<u32, StrBuffer>,
        E: EventSink,
    {
        let exec = match self.syscalls.pop(task.pid_tgid(), SyscallKind::Exec) {
            Some(SyscallCache::Exec(e)) if e.is_parsed => e,
            _ => return Ok(()),
        };

        let tgid = task.tgid();
        let now = task.ktime_ns();

        // comm is updated by the kernel between file check and commit
        if let Some(p) = self.procs.get_mut(&exec.cookie) {
            p.comm = task.comm();
        }

        let pid_entry = match self.pids.get_mut(&tgid) {
            Some(e) => {
                e.cookie = exec.cookie;
                e.uid = task.uid();
                e.gid = task.gid();
                *e
            }
            None => {
                let e = PidCacheEntry {
                    cookie: exec.cookie,
                    uid: task.uid(),
                    gid: task.gid(),
                    ..Default::default()
                };
                self.pids.insert(&tgid, &e)?;
                e
            }
        };

        if is_discarded(&mut self.discarders, tgid, Type::Exec, now) {
            return Ok(());
        }

        let procs = &mut self.procs;
        sink.emit(Type::Exec, task, |d: &mut ExecData| {
            d.pid_entry = pid_entry;
            if let Some(p) = procs.get(&exec.cookie) {
                d.proc_entry = *p;
            }
            d.args = capture.preview(&exec.args);
            d.envs = capture.preview(&exec.envs);
        });

        Ok(())
    }

    /// Drops the state of an exec that did not go through
    #[inline(always)]
    pub fn on_exec_syscall_exit<K: Task>(&mut self, task: &K) {
        let _ = self.syscalls.pop(task.pid_tgid(), SyscallKind::Exec);
    }

    /// Only thread group leaders are processed, other threads exiting
    /// have no lineage state.
    #[inline(always)]
    pub fn on_exit<K, E>(&mut self, task: &K, flushing: bool, sink: &mut E) -> ProbeResult<()>
    where
        K: Task,
        E: EventSink,
    {
        if !task.is_group_leader() {
            return Ok(());
        }

        let tgid = task.tgid();
        let now = task.ktime_ns();

        let discarded = is_discarded(&mut self.discarders, tgid, Type::Exit, now);
        // userland is deleting all the keys, we must not interfere
        if !flushing {
            let _ = self.discarders.remove(&tgid);
        }

        let pid_entry = match self.pids.get_mut(&tgid) {
            Some(e) => {
                e.exit_timestamp = now;
                *e
            }
            None => PidCacheEntry {
                exit_timestamp: now,
                ..Default::default()
            },
        };

        if discarded {
            return Ok(());
        }

        let procs = &mut self.procs;
        sink.emit(Type::Exit, task, |d: &mut ExitData| {
            d.pid_entry = pid_entry;
            if let Some(p) = procs.get(&pid_entry.cookie) {
                d.executable = p.executable;
                d.container = p.container;
            }
        });

        Ok(())
    }

    /// Back-fills the tty of the current image, or of the image being
    /// executed if an exec is in flight. An all zero name means no tty.
    #[inline(always)]
    pub fn on_tty<K: Task>(&mut self, task: &K, tty_name: &[u8; TTY_NAME_LEN]) {
        if tty_name.iter().all(|&b| b == 0) {
            return;
        }

        let cookie = match self.syscalls.peek_exec(task.pid_tgid()) {
            Some(e) if e.is_parsed => Some(e.cookie),
            _ => self.pids.get(&task.tgid()).map(|p| p.cookie),
        };

        if let Some(c) = cookie {
            if let Some(p) = self.procs.get_mut(&c) {
                p.tty_name = *tty_name;
            }
        }
    }
}
