//! Requests user space sends to the sensor through a dedicated ioctl
//! command. The first byte of the request is the operation, its
//! payload follows.

use crate::bpf_events::Type;
use crate::discarders::{self, PidDiscarder};
use crate::errors::ProbeResult;
use crate::maps::Map;
use crate::span::{CoroutineCtx, Span, SpanEngine, SpanKey, SpanRequest, StackSignatures};
use crate::task::{Task, UserMemory};

pub const ERPC_IOCTL_CMD: u32 = 0xdead_c001;

// event_type:u64 timeout:u64 pid:u32
const DISCARD_PID_PAYLOAD_SIZE: usize = 20;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    DiscardPid = 2,
    SpanBegin = 3,
}

impl Op {
    #[inline(always)]
    pub fn from_u8(op: u8) -> Option<Self> {
        match op {
            2 => Some(Self::DiscardPid),
            3 => Some(Self::SpanBegin),
            _ => None,
        }
    }
}

/// Reads a pid discarder request. Only privileged tasks can discard
/// events and only configurable event types are honored.
#[inline(always)]
fn handle_discard_pid<K, D>(discarders: &mut D, task: &K, data: u64) -> ProbeResult<()>
where
    K: Task + UserMemory,
    D: Map<u32, PidDiscarder>,
{
    if task.uid() != 0 {
        return Ok(());
    }

    let mut b = [0u8; DISCARD_PID_PAYLOAD_SIZE];
    task.read_bytes(data, &mut b)?;

    let mut event_type = [0u8; 8];
    let mut timeout = [0u8; 8];
    let mut pid = [0u8; 4];
    event_type.copy_from_slice(&b[0..8]);
    timeout.copy_from_slice(&b[8..16]);
    pid.copy_from_slice(&b[16..20]);

    let event_type = u64::from_ne_bytes(event_type);
    let ty = match u32::try_from(event_type).ok().and_then(Type::from_id) {
        Some(t) if t.is_configurable() => t,
        _ => return Ok(()),
    };

    discarders::discard_pid(
        discarders,
        u32::from_ne_bytes(pid),
        ty,
        task.ktime_ns(),
        u64::from_ne_bytes(timeout),
    )?;

    Ok(())
}

/// Handles the request found at `arg` if `cmd` targets us. Unknown
/// operations are ignored. `req` is the storage a span request is read
/// into, it does not have to be initialized.
#[inline(always)]
pub fn handle_ioctl<K, X, I, SP, SG, T, D>(
    spans: &mut SpanEngine<X, I, SP, SG, T>,
    discarders: &mut D,
    task: &K,
    cmd: u32,
    arg: u64,
    req: &mut SpanRequest,
) -> ProbeResult<()>
where
    K: Task + UserMemory,
    X: Map<u32, CoroutineCtx>,
    I: Map<u64, u64>,
    SP: Map<SpanKey, Span>,
    SG: Map<u32, StackSignatures>,
    T: Map<u32, u64>,
    D: Map<u32, PidDiscarder>,
{
    if cmd != ERPC_IOCTL_CMD {
        return Ok(());
    }

    let mut op = [0u8; 1];
    task.read_bytes(arg, &mut op)?;

    match Op::from_u8(op[0]) {
        Some(Op::DiscardPid) => handle_discard_pid(discarders, task, arg + 1),
        Some(Op::SpanBegin) => {
            task.read_bytes(arg + 1, req.as_bytes_mut())?;
            spans.handle_span_begin(task, req)
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::consts::{PID_DISCARDERS_SIZE, SPAN_REQUEST_SIZE};
    use crate::discarders::is_discarded;
    use crate::maps::LruMap;
    use crate::mock::{self, MockTask};

    fn discarders() -> LruMap<u32, PidDiscarder> {
        LruMap::with_max_entries(PID_DISCARDERS_SIZE as usize)
    }

    fn put_request(task: &mut MockTask, op: u8, token: u64, span_id: u64) -> u64 {
        let mut b = vec![op];
        b.extend_from_slice(&token.to_ne_bytes());
        b.extend_from_slice(&span_id.to_ne_bytes());
        b.extend_from_slice(&(span_id + 1).to_ne_bytes());
        b.extend_from_slice(&5u64.to_ne_bytes());
        // python-like model
        b.push(2);
        b.resize(1 + SPAN_REQUEST_SIZE, 0);
        task.mem.put_bytes(&b)
    }

    #[test]
    fn test_span_begin() {
        let mut e = mock::span_engine();
        let mut d = discarders();
        let mut task = MockTask::new(10, 11);
        let mut req = SpanRequest::default();

        let arg = put_request(&mut task, Op::SpanBegin as u8, 0x5ec, 1);
        handle_ioctl(&mut e, &mut d, &task, ERPC_IOCTL_CMD, arg, &mut req).unwrap();

        assert_eq!(
            e.current_span(&task),
            Some(Span {
                span_id: 1,
                trace_id: 2
            })
        );
        assert_eq!(e.coroutine_ids.get(&task.pid_tgid()), Some(&5));
    }

    #[test]
    fn test_ignored_requests() {
        let mut e = mock::span_engine();
        let mut d = discarders();
        let mut task = MockTask::new(10, 11);
        let mut req = SpanRequest::default();

        // other ioctl commands are not even read
        assert!(handle_ioctl(&mut e, &mut d, &task, 0x5401, 0, &mut req).is_ok());

        let arg = put_request(&mut task, 42, 0x5ec, 1);
        assert!(handle_ioctl(&mut e, &mut d, &task, ERPC_IOCTL_CMD, arg, &mut req).is_ok());
        assert_eq!(e.current_span(&task), None);

        // truncated payload
        let arg = task.mem.put_bytes(&[Op::SpanBegin as u8, 0, 0]);
        assert!(handle_ioctl(&mut e, &mut d, &task, ERPC_IOCTL_CMD, arg, &mut req).is_err());
        assert_eq!(e.current_span(&task), None);
    }

    fn put_discard_pid(task: &mut MockTask, event_type: u64, timeout: u64, pid: u32) -> u64 {
        let mut b = vec![Op::DiscardPid as u8];
        b.extend_from_slice(&event_type.to_ne_bytes());
        b.extend_from_slice(&timeout.to_ne_bytes());
        b.extend_from_slice(&pid.to_ne_bytes());
        task.mem.put_bytes(&b)
    }

    #[test]
    fn test_discard_pid() {
        let mut e = mock::span_engine();
        let mut d = discarders();
        let mut task = MockTask::new(1, 1);
        task.now = 1000;
        let mut req = SpanRequest::default();

        let arg = put_discard_pid(&mut task, Type::Exec.id() as u64, 500, 4242);
        handle_ioctl(&mut e, &mut d, &task, ERPC_IOCTL_CMD, arg, &mut req).unwrap();
        assert!(is_discarded(&mut d, 4242, Type::Exec, 1499));
        assert!(!is_discarded(&mut d, 4242, Type::Exec, 1500));
        assert!(!is_discarded(&mut d, 4242, Type::Exit, 1000));

        // types which are not events cannot be discarded
        for ty in [Type::Log.id() as u64, Type::Max.id() as u64, u64::MAX] {
            let arg = put_discard_pid(&mut task, ty, 0, 7);
            handle_ioctl(&mut e, &mut d, &task, ERPC_IOCTL_CMD, arg, &mut req).unwrap();
        }
        assert!(!d.contains_key(&7));

        // unprivileged tasks cannot hide themselves
        let mut user = MockTask::new(300, 300);
        user.uid_gid = (1000 << 32) | 1000;
        let arg = put_discard_pid(&mut user, Type::Exit.id() as u64, 0, 300);
        handle_ioctl(&mut e, &mut d, &user, ERPC_IOCTL_CMD, arg, &mut req).unwrap();
        assert!(!d.contains_key(&300));
    }
}
