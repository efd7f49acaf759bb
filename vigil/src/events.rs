//! JSON representation of the events received from the kernel

use aya::maps::{HashMap as AyaHashMap, MapData};
use chrono::{DateTime, Utc};
use serde::Serialize;
use vigil_common::{
    args::{PerfStrBuffer, StrArrayReader, StrBuffer},
    bpf_events::{EbpfEvent, EventInfo, ExecEvent, ExitEvent, ForkEvent, Type},
    process::{ContainerId, ExecutableId, PidCacheEntry, ProcCacheEntry},
};

use crate::util::uptime::BootClock;

/// Where complete argument and environment arrays are fetched from
pub trait ArgsSource {
    fn fetch(&self, id: u32) -> Option<StrBuffer>;
}

impl ArgsSource for AyaHashMap<MapData, u32, StrBuffer> {
    fn fetch(&self, id: u32) -> Option<StrBuffer> {
        self.get(&id, 0).ok()
    }
}

impl ArgsSource for std::collections::HashMap<u32, StrBuffer> {
    fn fetch(&self, id: u32) -> Option<StrBuffer> {
        self.get(&id).copied()
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessData {
    pub pid: u32,
    pub tid: u32,
    pub uid: u32,
    pub gid: u32,
    pub comm: String,
}

#[derive(Debug, Serialize)]
pub struct InfoData {
    #[serde(rename = "type")]
    pub etype: Type,
    pub utc_time: DateTime<Utc>,
    pub process: ProcessData,
}

#[derive(Debug, Serialize)]
pub struct ExecutableData {
    pub inode: u64,
    pub mount_id: u32,
}

impl From<&ExecutableId> for ExecutableData {
    fn from(value: &ExecutableId) -> Self {
        Self {
            inode: value.inode,
            mount_id: value.mount_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LineageData {
    pub cookie: u32,
    pub ppid: u32,
    pub fork_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct StrArrayData {
    pub id: u32,
    pub values: Vec<String>,
    // true when values are the preview only
    pub partial: bool,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
pub struct ForkData {
    pub child_pid: u32,
    pub lineage: LineageData,
    pub executable: ExecutableData,
    pub container: Option<String>,
    pub tty: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecData {
    pub lineage: LineageData,
    pub executable: ExecutableData,
    pub container: Option<String>,
    pub tty: Option<String>,
    pub exec_time: DateTime<Utc>,
    pub args: StrArrayData,
    pub envs: StrArrayData,
}

#[derive(Debug, Serialize)]
pub struct ExitData {
    pub lineage: LineageData,
    pub executable: ExecutableData,
    pub container: Option<String>,
    pub exit_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EventData {
    Fork(ForkData),
    Exec(ExecData),
    Exit(ExitData),
}

#[derive(Debug, Serialize)]
pub struct UserEvent {
    pub info: InfoData,
    pub data: EventData,
}

#[inline]
fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

#[inline]
fn container(c: &ContainerId) -> Option<String> {
    non_empty(c.as_str())
}

fn to_strings(r: StrArrayReader) -> Vec<String> {
    r.map(|b| String::from_utf8_lossy(b).to_string()).collect()
}

/// Builds [UserEvent] out of decoded kernel events
pub struct EventFormatter<S: ArgsSource> {
    clock: BootClock,
    args: S,
}

impl<S: ArgsSource> EventFormatter<S> {
    pub fn new(clock: BootClock, args: S) -> Self {
        Self { clock, args }
    }

    #[inline]
    fn time(&self, ktime_ns: u64) -> Option<DateTime<Utc>> {
        (ktime_ns != 0).then(|| self.clock.to_utc(ktime_ns))
    }

    fn info(&self, i: &EventInfo) -> InfoData {
        InfoData {
            etype: i.etype,
            utc_time: self.clock.to_utc(i.timestamp),
            process: ProcessData {
                pid: i.process.pid,
                tid: i.process.tid,
                uid: i.process.uid,
                gid: i.process.gid,
                comm: i.process.comm_str().to_string(),
            },
        }
    }

    fn lineage(&self, p: &PidCacheEntry) -> LineageData {
        LineageData {
            cookie: p.cookie,
            ppid: p.ppid,
            fork_time: self.time(p.fork_timestamp),
        }
    }

    /// Complete array when it is still cached, the preview otherwise
    fn str_array(&self, p: &PerfStrBuffer) -> StrArrayData {
        match self.args.fetch(p.id) {
            // the id may have been reused by another capture
            Some(buf) if buf.count == p.count => StrArrayData {
                id: p.id,
                values: to_strings(StrArrayReader::from_buffer(&buf)),
                partial: false,
                truncated: p.truncated,
            },
            _ => StrArrayData {
                id: p.id,
                values: to_strings(StrArrayReader::from_preview(p)),
                partial: true,
                truncated: p.truncated,
            },
        }
    }

    fn fork(&self, e: &ForkEvent) -> UserEvent {
        let proc: &ProcCacheEntry = &e.data.proc_entry;
        UserEvent {
            info: self.info(&e.info),
            data: EventData::Fork(ForkData {
                child_pid: e.data.child_pid,
                lineage: self.lineage(&e.data.pid_entry),
                executable: (&proc.executable).into(),
                container: container(&proc.container),
                tty: non_empty(proc.tty_str()),
            }),
        }
    }

    fn exec(&self, e: &ExecEvent) -> UserEvent {
        let proc = &e.data.proc_entry;
        UserEvent {
            info: self.info(&e.info),
            data: EventData::Exec(ExecData {
                lineage: self.lineage(&e.data.pid_entry),
                executable: (&proc.executable).into(),
                container: container(&proc.container),
                tty: non_empty(proc.tty_str()),
                exec_time: self.clock.to_utc(proc.exec_timestamp),
                args: self.str_array(&e.data.args),
                envs: self.str_array(&e.data.envs),
            }),
        }
    }

    fn exit(&self, e: &ExitEvent) -> UserEvent {
        UserEvent {
            info: self.info(&e.info),
            data: EventData::Exit(ExitData {
                lineage: self.lineage(&e.data.pid_entry),
                executable: (&e.data.executable).into(),
                container: container(&e.data.container),
                exit_time: self.time(e.data.pid_entry.exit_timestamp),
            }),
        }
    }

    /// Log events have no user representation
    pub fn format(&self, e: &EbpfEvent) -> Option<UserEvent> {
        match e {
            EbpfEvent::Fork(e) => Some(self.fork(e)),
            EbpfEvent::Exec(e) => Some(self.exec(e)),
            EbpfEvent::Exit(e) => Some(self.exit(e)),
            EbpfEvent::Log(_) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use vigil_common::args::ArgsCapture;
    use vigil_common::bpf_events::{EventBuffer, EventSink, ExecData as BpfExecData};
    use vigil_common::maps::{LruMap, Map, ScratchSlots};
    use vigil_common::task::{Task, UserMemory};

    // a task whose user memory holds a single NULL terminated argv
    struct ArgvTask {
        argv: Vec<&'static [u8]>,
        rand: u32,
    }

    const ARGV: u64 = 0x1000;
    const STR_BASE: u64 = 0x10_0000;
    const STR_STRIDE: u64 = 0x1000;

    impl Task for ArgvTask {
        fn pid_tgid(&self) -> u64 {
            (42u64 << 32) | 42
        }

        fn uid_gid(&self) -> u64 {
            0
        }

        fn ktime_ns(&self) -> u64 {
            2_000_000_000
        }

        fn random_u32(&mut self) -> u32 {
            self.rand += 1;
            self.rand
        }

        fn comm(&self) -> [u8; 16] {
            let mut c = [0; 16];
            c[..4].copy_from_slice(b"bash");
            c
        }
    }

    impl UserMemory for ArgvTask {
        fn read_ptr(&self, addr: u64) -> Result<u64, vigil_common::task::Error> {
            let i = ((addr - ARGV) / 8) as usize;
            Ok(match self.argv.get(i) {
                Some(_) => STR_BASE + i as u64 * STR_STRIDE,
                None => 0,
            })
        }

        fn read_bytes(&self, _addr: u64, _dst: &mut [u8]) -> Result<(), vigil_common::task::Error> {
            Err(vigil_common::task::Error::UserRead)
        }

        fn read_str(&self, addr: u64, dst: &mut [u8]) -> Result<usize, vigil_common::task::Error> {
            let s = self.argv[((addr - STR_BASE) / STR_STRIDE) as usize];
            dst[..s.len()].copy_from_slice(s);
            dst[s.len()] = 0;
            Ok(s.len() + 1)
        }

        fn user_stack(&self, _dst: &mut [u64; 3]) -> Result<usize, vigil_common::task::Error> {
            Ok(0)
        }
    }

    fn clock() -> BootClock {
        BootClock::with_boot_time(DateTime::from_timestamp(1_700_000_000, 0).unwrap())
    }

    // captures argv and emits an exec event previewing it
    fn exec_event(argv: Vec<&'static [u8]>) -> (ExecEvent, HashMap<u32, StrBuffer>) {
        let mut task = ArgvTask { argv, rand: 0 };
        let mut capture = ArgsCapture::new(
            ScratchSlots::<StrBuffer>::with_slots(1),
            LruMap::<u32, StrBuffer>::with_max_entries(4),
        );

        let r = capture.capture(&mut task, 0, ARGV).unwrap();
        let preview = capture.preview(&r);

        let mut sink = EventBuffer::default();
        sink.emit(Type::Exec, &task, |d: &mut BpfExecData| {
            d.args = preview;
            d.envs = PerfStrBuffer::default();
        });

        let ev = match sink.decode_all().unwrap().remove(0) {
            EbpfEvent::Exec(e) => *e,
            _ => panic!("expecting exec event"),
        };

        let mut cache = HashMap::new();
        cache.insert(r.id, *capture.cache.get(&r.id).unwrap());
        (ev, cache)
    }

    #[test]
    fn test_exec_full_args() {
        let long: &'static [u8] = &[b'x'; 100];
        let (ev, cache) = exec_event(vec![b"/bin/ls".as_slice(), b"-la", long]);

        let f = EventFormatter::new(clock(), cache);
        let ue = f.format(&EbpfEvent::Exec(Box::new(ev))).unwrap();

        let EventData::Exec(data) = &ue.data else {
            panic!("expecting exec data")
        };
        assert!(!data.args.partial);
        assert_eq!(data.args.values.len(), 3);
        assert_eq!(data.args.values[0], "/bin/ls");
        assert_eq!(data.args.values[2].len(), 100);
        assert_eq!(ue.info.process.comm, "bash");
        assert_eq!(
            ue.info.utc_time,
            DateTime::from_timestamp(1_700_000_002, 0).unwrap()
        );
    }

    #[test]
    fn test_exec_preview_fallback() {
        let long: &'static [u8] = &[b'x'; 100];
        let (ev, _) = exec_event(vec![b"/bin/ls".as_slice(), b"-la", long]);

        // complete array got evicted
        let f = EventFormatter::new(clock(), HashMap::new());
        let ue = f.format(&EbpfEvent::Exec(Box::new(ev))).unwrap();

        let EventData::Exec(data) = &ue.data else {
            panic!("expecting exec data")
        };
        assert!(data.args.partial);
        assert_eq!(data.args.values[0], "/bin/ls");
        assert_eq!(data.args.values[1], "-la");
        // last element does not fit into the preview
        assert!(data.args.values[2].len() < 100);
    }

    #[test]
    fn test_json() {
        let (ev, cache) = exec_event(vec![b"/bin/true".as_slice()]);
        let f = EventFormatter::new(clock(), cache);
        let ue = f.format(&EbpfEvent::Exec(Box::new(ev))).unwrap();

        let v: serde_json::Value = serde_json::to_value(&ue).unwrap();
        assert_eq!(v["info"]["type"], "exec");
        assert_eq!(v["info"]["process"]["pid"], 42);
        assert_eq!(v["data"]["args"]["values"][0], "/bin/true");
        assert!(v["data"]["container"].is_null());
    }
}
