use crate::bpf_events::Type;
use crate::{bpf_target_code, not_bpf_target_code};

not_bpf_target_code! {
    mod user;
    pub use user::*;
}

bpf_target_code! {
    mod bpf;
    pub use bpf::*;
}

// analyzer does not see both target so we can allow dead code
// to prevent warnings to happen
#[allow(dead_code)]
const CONFIG_MAP_NAME: &str = "VIGIL_CONFIG_ARRAY";

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loader {
    pub tgid: u32,
}

const FILTER_SIZE: usize = Type::Max as usize;

/// Controls which event types are emitted. Cache bookkeeping
/// always happens, whatever the filter says.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    enabled: [bool; FILTER_SIZE],
}

impl Filter {
    pub fn all_enabled() -> Self {
        Self {
            enabled: [true; FILTER_SIZE],
        }
    }

    pub fn all_disabled() -> Self {
        Self {
            enabled: [false; FILTER_SIZE],
        }
    }

    #[inline(always)]
    pub fn disable(&mut self, ty: Type) {
        if let Some(e) = self.enabled.get_mut(ty as usize) {
            *e = false
        }
    }

    #[inline(always)]
    pub fn enable(&mut self, ty: Type) {
        if let Some(e) = self.enabled.get_mut(ty as usize) {
            *e = true
        }
    }

    #[inline(always)]
    pub fn is_enabled(&self, ty: Type) -> bool {
        self.enabled.get(ty as usize).copied().unwrap_or(false)
    }

    #[inline(always)]
    pub fn is_disabled(&self, ty: Type) -> bool {
        !self.is_enabled(ty)
    }
}

/// Structure holding configuration to use in eBPF programs
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BpfConfig {
    pub loader: Loader,
    pub filter: Filter,
}

impl BpfConfig {
    #[inline(always)]
    pub fn is_loader(&self, tgid: u32) -> bool {
        self.loader.tgid == tgid
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_filter() {
        let mut f = Filter::all_disabled();
        f.enable(Type::Exec);
        assert!(f.is_enabled(Type::Exec));
        assert!(f.is_disabled(Type::Fork));

        let mut f = Filter::all_enabled();
        f.disable(Type::Exit);
        assert!(f.is_disabled(Type::Exit));
        // out of range types are never enabled
        assert!(f.is_disabled(Type::Max));
    }
}
