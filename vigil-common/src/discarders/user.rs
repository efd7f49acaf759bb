use aya::{
    maps::{Array, HashMap, MapData, MapError},
    Ebpf, Pod,
};
use thiserror::Error;

use super::{PidDiscarder, FLUSHING_DISCARDERS_MAP, PID_DISCARDERS_MAP};

unsafe impl Pod for PidDiscarder {}

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing map: {0}")]
    MissingMap(&'static str),
    #[error("map error: {0}")]
    Map(#[from] MapError),
}

/// Userland handle on the discarder maps
pub struct Discarders {
    pids: HashMap<MapData, u32, PidDiscarder>,
    flushing: Array<MapData, u32>,
}

impl Discarders {
    pub fn take_from(bpf: &mut Ebpf) -> Result<Self, Error> {
        let pids = bpf
            .take_map(PID_DISCARDERS_MAP)
            .ok_or(Error::MissingMap(PID_DISCARDERS_MAP))?;
        let flushing = bpf
            .take_map(FLUSHING_DISCARDERS_MAP)
            .ok_or(Error::MissingMap(FLUSHING_DISCARDERS_MAP))?;

        Ok(Self {
            pids: HashMap::try_from(pids)?,
            flushing: Array::try_from(flushing)?,
        })
    }

    /// Removes all pid discarders. The kernel is told a flush is in
    /// progress so that exiting processes leave the map alone meanwhile.
    /// Returns the number of discarders removed.
    pub fn flush(&mut self) -> Result<usize, Error> {
        self.flushing.set(0, 1, 0)?;

        let keys: Vec<u32> = self.pids.keys().filter_map(Result::ok).collect();
        let mut removed = 0;
        for k in keys {
            // entries may vanish because of concurrent exits or eviction
            if self.pids.remove(&k).is_ok() {
                removed += 1;
            }
        }

        self.flushing.set(0, 0, 0)?;
        Ok(removed)
    }
}
