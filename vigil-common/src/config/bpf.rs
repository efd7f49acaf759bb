use aya_ebpf::macros::map;
use aya_ebpf::maps::Array;

use super::BpfConfig;

#[map]
static mut VIGIL_CONFIG_ARRAY: Array<BpfConfig> = Array::with_max_entries(1, 0);

/// Function to retrieve configuration into eBPF code
#[inline(always)]
pub unsafe fn config() -> Option<&'static BpfConfig> {
    VIGIL_CONFIG_ARRAY.get(0)
}
