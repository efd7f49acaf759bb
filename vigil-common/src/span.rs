//! Correlation of application level spans with kernel tasks.
//!
//! Tracers running in user space announce the span a coroutine starts
//! working on. Requests are authenticated per process, either by the
//! call site they are issued from (goroutine-like runtimes) or by a
//! secret token (python-like runtimes), so that another piece of code in
//! the same process cannot forge spans.

use crate::consts::{COROUTINE_DATA_LEN, SPAN_REQUEST_SIZE, STACK_SIG_DEPTH};
use crate::errors::{ProbeError, ProbeResult};
use crate::maps::Map;
use crate::task::{Task, UserMemory};

use vigil_macros::BpfError;

pub const COROUTINE_CTX_MAP: &str = "COROUTINE_CTX";
pub const COROUTINE_IDS_MAP: &str = "COROUTINE_IDS";
pub const SPAN_IDS_MAP: &str = "SPAN_IDS";
pub const STACK_TRACE_SIGNATURES_MAP: &str = "STACK_TRACE_SIGNATURES";
pub const SECRET_TOKENS_MAP: &str = "SECRET_TOKENS";

#[repr(C)]
#[derive(BpfError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("unknown coroutine model")]
    UnknownModel,
    #[error("user stack is not available")]
    EmptyStack,
    #[error("invalid stack trace signature")]
    InvalidSignature,
    #[error("invalid secret token")]
    InvalidToken,
    #[error("coroutine model differs from the one of the process")]
    ModelMismatch,
}

impl From<Error> for ProbeError {
    fn from(value: Error) -> Self {
        Self::SpanError(value)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineModel {
    /// spans are keyed by tgid, requests authenticated by call site
    Goroutine = 1,
    /// spans are keyed by thread id, requests authenticated by token
    Python = 2,
}

impl CoroutineModel {
    #[inline(always)]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Goroutine),
            2 => Some(Self::Python),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanKey {
    pub coroutine_id: u64,
    pub id: u32,
    pub padding: u32,
}

impl SpanKey {
    #[inline(always)]
    pub fn new(coroutine_id: u64, id: u32) -> Self {
        Self {
            coroutine_id,
            id,
            padding: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub span_id: u64,
    pub trace_id: u64,
}

/// Runtime specific context of the coroutines of a process
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoroutineCtx {
    pub model: u8,
    pub data: [u8; COROUTINE_DATA_LEN],
}

impl Default for CoroutineCtx {
    fn default() -> Self {
        Self {
            model: 0,
            data: [0; COROUTINE_DATA_LEN],
        }
    }
}

/// Span begin request as written by tracers. The layout matches
/// the wire format, there is no padding.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SpanRequest {
    pub token: u64,
    pub span: Span,
    pub coroutine_id: u64,
    pub ctx: CoroutineCtx,
}

const _: () = assert!(core::mem::size_of::<SpanRequest>() == SPAN_REQUEST_SIZE);

impl SpanRequest {
    #[inline(always)]
    pub fn as_bytes_mut(&mut self) -> &mut [u8; SPAN_REQUEST_SIZE] {
        // SpanRequest has no padding and any bit pattern is valid
        unsafe { &mut *(self as *mut Self as *mut [u8; SPAN_REQUEST_SIZE]) }
    }

    #[inline(always)]
    pub fn model(&self) -> Option<CoroutineModel> {
        CoroutineModel::from_tag(self.ctx.model)
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StackSignatures {
    pub first: [u64; STACK_SIG_DEPTH],
    // all zero until learnt
    pub second: [u64; STACK_SIG_DEPTH],
}

pub struct SpanEngine<X, I, SP, SG, T> {
    pub coroutine_ctx: X,
    pub coroutine_ids: I,
    pub spans: SP,
    pub signatures: SG,
    pub tokens: T,
}

impl<X, I, SP, SG, T> SpanEngine<X, I, SP, SG, T>
where
    X: Map<u32, CoroutineCtx>,
    I: Map<u64, u64>,
    SP: Map<SpanKey, Span>,
    SG: Map<u32, StackSignatures>,
    T: Map<u32, u64>,
{
    pub fn new(coroutine_ctx: X, coroutine_ids: I, spans: SP, signatures: SG, tokens: T) -> Self {
        Self {
            coroutine_ctx,
            coroutine_ids,
            spans,
            signatures,
            tokens,
        }
    }

    /// The first two distinct call sites seen for `tgid` are learnt,
    /// later requests must come from one of them.
    #[inline(always)]
    pub fn check_stack_trace_signature<K: UserMemory>(&mut self, task: &K, tgid: u32) -> ProbeResult<()> {
        let mut active = [0u64; STACK_SIG_DEPTH];
        match task.user_stack(&mut active) {
            Ok(n) if n > 0 => {}
            _ => return Err(Error::EmptyStack.into()),
        }

        match self.signatures.get_mut(&tgid) {
            Some(sig) => {
                if sig.first == active || sig.second == active {
                    return Ok(());
                }

                if sig.second[0] == 0 {
                    sig.second = active;
                    return Ok(());
                }

                Err(Error::InvalidSignature.into())
            }
            None => {
                self.signatures.insert(
                    &tgid,
                    &StackSignatures {
                        first: active,
                        ..Default::default()
                    },
                )?;
                Ok(())
            }
        }
    }

    /// The first token presented for `tgid` becomes its secret
    #[inline(always)]
    pub fn check_secret_token(&mut self, tgid: u32, token: u64) -> ProbeResult<()> {
        match self.tokens.get(&tgid) {
            Some(&secret) if secret == token => Ok(()),
            Some(_) => Err(Error::InvalidToken.into()),
            None => {
                self.tokens.insert(&tgid, &token)?;
                Ok(())
            }
        }
    }

    /// Model the process authenticated with first. The coroutine context
    /// may have been evicted while the handshake state is still there.
    #[inline(always)]
    fn bound_model(&mut self, tgid: u32) -> Option<CoroutineModel> {
        if let Some(ctx) = self.coroutine_ctx.get(&tgid) {
            if let Some(m) = CoroutineModel::from_tag(ctx.model) {
                return Some(m);
            }
        }

        if self.signatures.contains_key(&tgid) {
            return Some(CoroutineModel::Goroutine);
        }

        if self.tokens.contains_key(&tgid) {
            return Some(CoroutineModel::Python);
        }

        None
    }

    /// Authenticates `req` and records the span it announces. A process
    /// is bound to the model of its first accepted request. A rejected
    /// request leaves every map untouched.
    #[inline(always)]
    pub fn handle_span_begin<K>(&mut self, task: &K, req: &SpanRequest) -> ProbeResult<()>
    where
        K: Task + UserMemory,
    {
        let pid_tgid = task.pid_tgid();
        let tgid = task.tgid();

        let model = req.model().ok_or(Error::UnknownModel)?;
        if matches!(self.bound_model(tgid), Some(m) if m != model) {
            return Err(Error::ModelMismatch.into());
        }

        let key = match model {
            CoroutineModel::Goroutine => {
                self.check_stack_trace_signature(task, tgid)?;
                SpanKey::new(req.coroutine_id, tgid)
            }
            CoroutineModel::Python => {
                self.check_secret_token(tgid, req.token)?;
                SpanKey::new(req.coroutine_id, task.tid())
            }
        };

        self.spans.insert(&key, &req.span)?;
        self.coroutine_ctx.insert(&tgid, &req.ctx)?;
        self.coroutine_ids.insert(&pid_tgid, &req.coroutine_id)?;

        Ok(())
    }

    /// Span the current thread is working on, if any
    #[inline(always)]
    pub fn current_span<K: Task>(&mut self, task: &K) -> Option<Span> {
        let pid_tgid = task.pid_tgid();
        let tgid = task.tgid();

        let model = CoroutineModel::from_tag(self.coroutine_ctx.get(&tgid)?.model)?;
        let coroutine_id = self.coroutine_ids.get(&pid_tgid).copied().unwrap_or_default();

        let key = match model {
            CoroutineModel::Goroutine => SpanKey::new(coroutine_id, tgid),
            CoroutineModel::Python => SpanKey::new(coroutine_id, task.tid()),
        };

        self.spans.get(&key).copied()
    }

    /// Forgets the coroutine bound to an exiting thread
    #[inline(always)]
    pub fn release_thread(&mut self, pid_tgid: u64) {
        let _ = self.coroutine_ids.remove(&pid_tgid);
    }

    /// Forgets the authentication state of a dead process so that a
    /// process reusing the pid goes through the handshake again
    #[inline(always)]
    pub fn release_pid(&mut self, tgid: u32) {
        let _ = self.signatures.remove(&tgid);
        let _ = self.tokens.remove(&tgid);
        let _ = self.coroutine_ctx.remove(&tgid);
    }

    /// Called for every exiting thread. The process state goes away with
    /// the last thread of the group only, a leader may exit before the
    /// other threads.
    #[inline(always)]
    pub fn on_task_exit(&mut self, pid_tgid: u64, group_dead: bool) {
        self.release_thread(pid_tgid);
        if group_dead {
            self.release_pid((pid_tgid >> 32) as u32);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{self, MockTask};

    fn request(model: CoroutineModel, token: u64, coroutine_id: u64, span_id: u64) -> SpanRequest {
        let mut r = SpanRequest {
            token,
            span: Span {
                span_id,
                trace_id: span_id * 10,
            },
            coroutine_id,
            ..Default::default()
        };
        r.ctx.model = model as u8;
        r.ctx.data[0] = 0x42;
        r
    }

    #[test]
    fn test_request_layout() {
        let mut r = SpanRequest::default();
        let b = r.as_bytes_mut();
        b[0..8].copy_from_slice(&1u64.to_ne_bytes());
        b[8..16].copy_from_slice(&2u64.to_ne_bytes());
        b[16..24].copy_from_slice(&3u64.to_ne_bytes());
        b[24..32].copy_from_slice(&4u64.to_ne_bytes());
        b[32] = 2;
        b[33] = 0xaa;
        b[255] = 0xbb;

        assert_eq!(r.token, 1);
        assert_eq!(r.span, Span { span_id: 2, trace_id: 3 });
        assert_eq!(r.coroutine_id, 4);
        assert_eq!(r.model(), Some(CoroutineModel::Python));
        assert_eq!(r.ctx.data[0], 0xaa);
        assert_eq!(r.ctx.data[COROUTINE_DATA_LEN - 1], 0xbb);
    }

    #[test]
    fn test_stack_signature_handshake() {
        let mut e = mock::span_engine();
        let mut task = MockTask::new(100, 101);
        let site_a = vec![0x10, 0x11, 0x12];
        let site_b = vec![0x20, 0x21, 0x22];
        let site_c = vec![0x30, 0x31, 0x32];

        task.mem.stack = site_a.clone();
        let r = request(CoroutineModel::Goroutine, 0, 7, 1);
        assert!(e.handle_span_begin(&task, &r).is_ok());
        assert_eq!(e.current_span(&task), Some(r.span));

        task.mem.stack = site_b.clone();
        let r = request(CoroutineModel::Goroutine, 0, 7, 2);
        assert!(e.handle_span_begin(&task, &r).is_ok());
        assert_eq!(e.current_span(&task), Some(r.span));

        // a third call site is rejected and nothing changes
        task.mem.stack = site_c;
        let rejected = request(CoroutineModel::Goroutine, 0, 7, 3);
        assert_eq!(
            e.handle_span_begin(&task, &rejected),
            Err(Error::InvalidSignature.into())
        );
        assert_eq!(e.current_span(&task).map(|s| s.span_id), Some(2));

        // learnt sites are accepted in any order
        for (i, site) in [&site_a, &site_b, &site_a, &site_a, &site_b].iter().enumerate() {
            task.mem.stack = site.to_vec();
            let r = request(CoroutineModel::Goroutine, 0, 7, 10 + i as u64);
            assert!(e.handle_span_begin(&task, &r).is_ok());
            assert_eq!(e.current_span(&task), Some(r.span));
        }
    }

    #[test]
    fn test_goroutine_spans_shared_by_threads() {
        let mut e = mock::span_engine();
        let mut task = MockTask::new(100, 100);
        task.mem.stack = vec![1, 2, 3];

        let r = request(CoroutineModel::Goroutine, 0, 7, 1);
        e.handle_span_begin(&task, &r).unwrap();

        // goroutine 7 got scheduled on another thread of the process
        let other = task.thread(102);
        let mut r2 = request(CoroutineModel::Goroutine, 0, 7, 1);
        r2.span = r.span;
        e.handle_span_begin(&other, &r2).unwrap();
        assert_eq!(e.current_span(&other), Some(r.span));
        assert_eq!(e.current_span(&task), Some(r.span));
    }

    #[test]
    fn test_empty_stack_rejected() {
        let mut e = mock::span_engine();
        let task = MockTask::new(100, 100);

        let r = request(CoroutineModel::Goroutine, 0, 7, 1);
        assert_eq!(
            e.handle_span_begin(&task, &r),
            Err(Error::EmptyStack.into())
        );
        assert_eq!(e.current_span(&task), None);
        assert!(!e.signatures.contains_key(&100));
    }

    #[test]
    fn test_secret_token_handshake() {
        let mut e = mock::span_engine();
        let task = MockTask::new(200, 201);

        let r = request(CoroutineModel::Python, 0xcafe, 1, 1);
        e.handle_span_begin(&task, &r).unwrap();
        assert_eq!(e.current_span(&task), Some(r.span));

        let forged = request(CoroutineModel::Python, 0xbad, 1, 2);
        assert_eq!(
            e.handle_span_begin(&task, &forged),
            Err(Error::InvalidToken.into())
        );
        assert_eq!(e.current_span(&task), Some(r.span));

        let update = request(CoroutineModel::Python, 0xcafe, 1, 3);
        e.handle_span_begin(&task, &update).unwrap();
        assert_eq!(e.current_span(&task), Some(update.span));
    }

    #[test]
    fn test_python_spans_per_thread() {
        let mut e = mock::span_engine();
        let t1 = MockTask::new(200, 201);
        let t2 = t1.thread(202);

        let r1 = request(CoroutineModel::Python, 0xcafe, 1, 1);
        let r2 = request(CoroutineModel::Python, 0xcafe, 1, 2);
        e.handle_span_begin(&t1, &r1).unwrap();
        e.handle_span_begin(&t2, &r2).unwrap();

        assert_eq!(e.current_span(&t1), Some(r1.span));
        assert_eq!(e.current_span(&t2), Some(r2.span));
    }

    #[test]
    fn test_unknown_model() {
        let mut e = mock::span_engine();
        let task = MockTask::new(200, 200);
        let mut r = request(CoroutineModel::Python, 1, 1, 1);
        r.ctx.model = 3;

        assert_eq!(
            e.handle_span_begin(&task, &r),
            Err(Error::UnknownModel.into())
        );
        assert!(!e.tokens.contains_key(&200));
        assert_eq!(e.current_span(&task), None);
    }

    #[test]
    fn test_current_span_no_context() {
        let mut e = mock::span_engine();
        let task = MockTask::new(300, 300);
        assert_eq!(e.current_span(&task), None);
        // lookup never learns anything
        assert!(!e.tokens.contains_key(&300));
        assert!(!e.signatures.contains_key(&300));
    }

    #[test]
    fn test_release() {
        let mut e = mock::span_engine();
        let task = MockTask::new(200, 201);
        let r = request(CoroutineModel::Python, 0xcafe, 9, 1);
        e.handle_span_begin(&task, &r).unwrap();

        // the thread does not carry its coroutine anymore
        e.release_thread(task.pid_tgid());
        assert!(!e.coroutine_ids.contains_key(&task.pid_tgid()));
        assert_eq!(e.current_span(&task), None);

        // a recycled pid establishes a new token
        e.release_pid(200);
        assert_eq!(e.current_span(&task), None);
        let r = request(CoroutineModel::Python, 0xf00d, 9, 2);
        e.handle_span_begin(&task, &r).unwrap();
        assert_eq!(e.current_span(&task), Some(r.span));
    }

    #[test]
    fn test_model_bound_to_process() {
        let mut e = mock::span_engine();
        let mut task = MockTask::new(100, 101);

        task.mem.stack = vec![0x10, 0x11];
        e.handle_span_begin(&task, &request(CoroutineModel::Goroutine, 0, 7, 1))
            .unwrap();
        task.mem.stack = vec![0x20, 0x21];
        e.handle_span_begin(&task, &request(CoroutineModel::Goroutine, 0, 7, 2))
            .unwrap();

        // a third call site switching to token authentication
        task.mem.stack = vec![0x30, 0x31];
        let forged = request(CoroutineModel::Python, 0x666, 7, 666);
        assert_eq!(
            e.handle_span_begin(&task, &forged),
            Err(Error::ModelMismatch.into())
        );
        assert_eq!(e.current_span(&task).map(|s| s.span_id), Some(2));
        assert_eq!(
            e.coroutine_ctx.get(&100).map(|c| c.model),
            Some(CoroutineModel::Goroutine as u8)
        );
        assert!(!e.tokens.contains_key(&100));

        // binding holds once the coroutine context is evicted
        e.coroutine_ctx.remove(&100).unwrap();
        assert_eq!(
            e.handle_span_begin(&task, &forged),
            Err(Error::ModelMismatch.into())
        );

        // the other way around
        let py = MockTask::new(200, 200);
        e.handle_span_begin(&py, &request(CoroutineModel::Python, 0xcafe, 1, 1))
            .unwrap();
        let mut go = py.thread(201);
        go.mem.stack = vec![0x40];
        assert_eq!(
            e.handle_span_begin(&go, &request(CoroutineModel::Goroutine, 0, 1, 2)),
            Err(Error::ModelMismatch.into())
        );
        assert!(!e.signatures.contains_key(&200));
    }

    #[test]
    fn test_leader_exit_keeps_handshake() {
        let mut e = mock::span_engine();
        let mut leader = MockTask::new(100, 100);
        let site_a = vec![0x10, 0x11];

        leader.mem.stack = site_a.clone();
        e.handle_span_begin(&leader, &request(CoroutineModel::Goroutine, 0, 7, 1))
            .unwrap();
        leader.mem.stack = vec![0x20, 0x21];
        e.handle_span_begin(&leader, &request(CoroutineModel::Goroutine, 0, 7, 2))
            .unwrap();

        // the leader exits while another thread keeps running
        let mut worker = leader.thread(101);
        e.on_task_exit(leader.pid_tgid(), false);
        assert!(e.signatures.contains_key(&100));

        worker.mem.stack = vec![0x30, 0x31];
        assert_eq!(
            e.handle_span_begin(&worker, &request(CoroutineModel::Goroutine, 0, 7, 3)),
            Err(Error::InvalidSignature.into())
        );
        worker.mem.stack = site_a;
        assert!(e
            .handle_span_begin(&worker, &request(CoroutineModel::Goroutine, 0, 7, 4))
            .is_ok());

        // last thread of the group
        e.on_task_exit(worker.pid_tgid(), true);
        assert!(!e.signatures.contains_key(&100));
        assert!(!e.coroutine_ctx.contains_key(&100));
        assert!(!e.coroutine_ids.contains_key(&worker.pid_tgid()));
    }
}
