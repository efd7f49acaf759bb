use crate::bpf_events::Type;
use crate::errors::MapError;
use crate::maps::Map;
use crate::{bpf_target_code, not_bpf_target_code};

bpf_target_code! {
    mod bpf;
    pub use bpf::*;
}

not_bpf_target_code! {
    mod user;
    pub use user::*;
}

#[allow(dead_code)]
const PID_DISCARDERS_MAP: &str = "PID_DISCARDERS";
#[allow(dead_code)]
const FLUSHING_DISCARDERS_MAP: &str = "FLUSHING_DISCARDERS";

/// Suppresses the emission of some event types for a pid. Discarders
/// are pushed through eRPC, a zero `expire_at` never expires.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PidDiscarder {
    pub event_mask: u64,
    pub expire_at: u64,
}

impl PidDiscarder {
    pub fn new(types: &[Type], expire_at: u64) -> Self {
        Self {
            event_mask: types.iter().fold(0, |m, t| m | t.mask()),
            expire_at,
        }
    }

    #[inline(always)]
    pub fn discards(&self, ty: Type, now: u64) -> bool {
        self.event_mask & ty.mask() != 0 && (self.expire_at == 0 || now < self.expire_at)
    }
}

/// Adds `ty` to the types discarded for `pid`. The timeout applies to
/// the whole entry, zero meaning forever. An expired entry is replaced.
#[inline(always)]
pub fn discard_pid<D: Map<u32, PidDiscarder>>(
    d: &mut D,
    pid: u32,
    ty: Type,
    now: u64,
    timeout: u64,
) -> Result<(), MapError> {
    let expire_at = if timeout == 0 {
        0
    } else {
        now.saturating_add(timeout)
    };

    if let Some(e) = d.get_mut(&pid) {
        if e.expire_at == 0 || now < e.expire_at {
            e.event_mask |= ty.mask();
            e.expire_at = expire_at;
            return Ok(());
        }
    }

    d.insert(
        &pid,
        &PidDiscarder {
            event_mask: ty.mask(),
            expire_at,
        },
    )
}

#[inline(always)]
pub fn is_discarded<D: Map<u32, PidDiscarder>>(d: &mut D, pid: u32, ty: Type, now: u64) -> bool {
    d.get(&pid).map(|e| e.discards(ty, now)).unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::maps::LruMap;

    #[test]
    fn test_discarder() {
        let d = PidDiscarder::new(&[Type::Exec, Type::Exit], 100);
        assert!(d.discards(Type::Exec, 50));
        assert!(!d.discards(Type::Fork, 50));
        // expired
        assert!(!d.discards(Type::Exit, 100));

        let forever = PidDiscarder::new(&[Type::Fork], 0);
        assert!(forever.discards(Type::Fork, u64::MAX));
    }

    #[test]
    fn test_is_discarded() {
        let mut m = LruMap::with_max_entries(8);
        m.insert(&42, &PidDiscarder::new(&[Type::Exit], 0)).unwrap();
        assert!(is_discarded(&mut m, 42, Type::Exit, 0));
        assert!(!is_discarded(&mut m, 42, Type::Exec, 0));
        assert!(!is_discarded(&mut m, 43, Type::Exit, 0));
    }

    #[test]
    fn test_discard_pid() {
        let mut m = LruMap::with_max_entries(8);

        discard_pid(&mut m, 42, Type::Exec, 10, 0).unwrap();
        discard_pid(&mut m, 42, Type::Exit, 20, 100).unwrap();
        assert!(is_discarded(&mut m, 42, Type::Exec, 50));
        assert!(is_discarded(&mut m, 42, Type::Exit, 50));
        assert!(!is_discarded(&mut m, 42, Type::Fork, 50));
        // the last timeout applies to the entry
        assert!(!is_discarded(&mut m, 42, Type::Exec, 120));

        // types of an expired entry are forgotten
        discard_pid(&mut m, 42, Type::Fork, 200, 0).unwrap();
        assert!(is_discarded(&mut m, 42, Type::Fork, 300));
        assert!(!is_discarded(&mut m, 42, Type::Exec, 300));
    }
}
