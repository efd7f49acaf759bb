use super::{BpfConfig, Loader, CONFIG_MAP_NAME};
use aya::{
    maps::{Array, MapError},
    Ebpf, Pod,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{CONFIG_MAP_NAME} map is missing, maybe it is not used in eBPF code")]
    MissingMap,
    #[error("map error: {0}")]
    Map(#[from] MapError),
}

impl Loader {
    pub fn from_own_pid() -> Self {
        // std::process::id returns the process ID which
        // turns to be the equivalent of the tgid
        Loader {
            tgid: std::process::id(),
        }
    }
}

unsafe impl Pod for BpfConfig {}

impl BpfConfig {
    pub fn init_config_in_bpf(bpf: &mut Ebpf, conf: Self) -> Result<(), Error> {
        let mut bpf_config =
            Array::try_from(bpf.map_mut(CONFIG_MAP_NAME).ok_or(Error::MissingMap)?)?;
        Ok(bpf_config.set(0, conf, 0)?)
    }
}
