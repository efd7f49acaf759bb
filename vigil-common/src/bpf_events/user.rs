use aya::Pod;
use core::fmt::{Debug, Display};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use thiserror::Error;

use super::{
    Event, EventInfo, EventSink, ExecEvent, ExitEvent, ForkEvent, LogEvent, Type,
};
use crate::config::Filter;
use crate::task::Task;

unsafe impl Pod for Type {}

impl Display for Type {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Type {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Type::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecoderError {
    #[error("not enough bytes to decode")]
    NotEnoughBytes,
    #[error("size of buffer does not match with size of event")]
    SizeDontMatch,
    #[error("invalid event type id: {0}")]
    InvalidType(u32),
    #[error("unsupported event type: {0}")]
    Unsupported(Type),
}

#[derive(Debug)]
pub enum EbpfEvent {
    Fork(Box<ForkEvent>),
    Exec(Box<ExecEvent>),
    Exit(Box<ExitEvent>),
    Log(Box<LogEvent>),
}

/// Reads a `T` out of `bytes` regardless of their alignment
///
/// # Safety
/// * any bit pattern of the `size_of::<T>()` first bytes must be a valid `T`
unsafe fn read_unaligned<T>(bytes: &[u8]) -> Result<T, DecoderError> {
    if bytes.len() < core::mem::size_of::<T>() {
        return Err(DecoderError::SizeDontMatch);
    }
    Ok(core::ptr::read_unaligned(bytes.as_ptr() as *const T))
}

impl EbpfEvent {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecoderError> {
        // event content must be at least the size of EventInfo
        if bytes.len() < core::mem::size_of::<EventInfo>() {
            return Err(DecoderError::NotEnoughBytes);
        }

        // the type is checked before anything gets interpreted as an enum
        let mut id = [0u8; 4];
        id.copy_from_slice(&bytes[..4]);
        let id = u32::from_ne_bytes(id);
        let ty = Type::from_id(id).ok_or(DecoderError::InvalidType(id))?;

        macro_rules! decode {
            ($src: ident) => {
                Box::new(unsafe { read_unaligned::<$src>(bytes)? })
            };
        }

        match ty {
            Type::Fork => Ok(Self::Fork(decode!(ForkEvent))),
            Type::Exec => Ok(Self::Exec(decode!(ExecEvent))),
            Type::Exit => Ok(Self::Exit(decode!(ExitEvent))),
            Type::Log => Ok(Self::Log(decode!(LogEvent))),
            Type::Unknown | Type::EndConfigurable | Type::Max => {
                Err(DecoderError::Unsupported(ty))
            }
        }
    }

    #[inline(always)]
    pub fn ty(&self) -> Type {
        self.info().etype
    }

    #[inline(always)]
    pub fn info(&self) -> &EventInfo {
        match self {
            Self::Fork(e) => &e.info,
            Self::Exec(e) => &e.info,
            Self::Exit(e) => &e.info,
            Self::Log(e) => &e.info,
        }
    }
}

/// Raw bytes of an event as received from the kernel
#[derive(Debug, Clone)]
pub struct EncodedEvent {
    data: Vec<u8>,
}

impl EncodedEvent {
    pub fn from_bytes(b: &[u8]) -> Self {
        EncodedEvent { data: b.to_vec() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn decode(&self) -> Result<EbpfEvent, DecoderError> {
        EbpfEvent::from_bytes(&self.data)
    }
}

/// In memory [EventSink] keeping encoded events in emission order
pub struct EventBuffer {
    filter: Filter,
    pub events: Vec<EncodedEvent>,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::with_filter(Filter::all_enabled())
    }
}

impl EventBuffer {
    pub fn with_filter(filter: Filter) -> Self {
        Self {
            filter,
            events: vec![],
        }
    }

    pub fn decode_all(&self) -> Result<Vec<EbpfEvent>, DecoderError> {
        self.events.iter().map(|e| e.decode()).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear()
    }
}

impl EventSink for EventBuffer {
    fn emit<K, T, F>(&mut self, ty: Type, task: &K, fill: F)
    where
        K: Task,
        F: FnOnce(&mut T),
    {
        if self.filter.is_disabled(ty) {
            return;
        }

        // events are plain repr(C) data valid when zeroed, like the
        // staging storage they are built in eBPF
        let mut e: Box<Event<T>> = Box::new(unsafe { core::mem::zeroed() });
        e.info.init(ty, task);
        fill(&mut e.data);
        self.events.push(EncodedEvent::from_bytes(e.encode()));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bpf_events::LogData;
    use crate::errors::ProbeError;
    use crate::mock::MockTask;

    #[test]
    fn test_encode_decode() {
        let task = MockTask::new(42, 43);
        let mut sink = EventBuffer::default();

        sink.emit(Type::Log, &task, |d: &mut LogData| {
            d.line = 4242;
            d.error = ProbeError::NullPointer;
        });

        // decoding must not rely on buffer alignment
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(sink.events[0].as_bytes());

        match EbpfEvent::from_bytes(&shifted[1..]).unwrap() {
            EbpfEvent::Log(e) => {
                assert_eq!(e.info.process.pid, 42);
                assert_eq!(e.info.process.tid, 43);
                assert_eq!(e.data.line, 4242);
                assert_eq!(e.data.error, ProbeError::NullPointer);
            }
            e => panic!("unexpected event {:?}", e.ty()),
        }
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            EbpfEvent::from_bytes(&[0u8; 4]).unwrap_err(),
            DecoderError::NotEnoughBytes
        );

        let mut bytes = vec![0u8; core::mem::size_of::<EventInfo>()];
        bytes[..4].copy_from_slice(&4242u32.to_ne_bytes());
        assert_eq!(
            EbpfEvent::from_bytes(&bytes).unwrap_err(),
            DecoderError::InvalidType(4242)
        );

        // a valid type with a truncated payload
        bytes[..4].copy_from_slice(&Type::Exec.id().to_ne_bytes());
        assert_eq!(
            EbpfEvent::from_bytes(&bytes).unwrap_err(),
            DecoderError::SizeDontMatch
        );
    }

    #[test]
    fn test_filtered_emission() {
        let task = MockTask::new(1, 1);
        let mut filter = Filter::all_enabled();
        filter.disable(Type::Log);
        let mut sink = EventBuffer::with_filter(filter);

        sink.emit(Type::Log, &task, |_: &mut LogData| {});
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_type_serde() {
        assert_eq!(serde_json::to_string(&Type::Exec).unwrap(), r#""exec""#);
        let t: Type = serde_json::from_str(r#""fork""#).unwrap();
        assert_eq!(t, Type::Fork);
    }
}
