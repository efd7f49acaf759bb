use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, path::PathBuf, str::FromStr};
use thiserror::Error;
use vigil_common::{
    bpf_events,
    config::{BpfConfig, Filter, Loader},
};

pub const DEFAULT_MAX_BUFFERED_EVENTS: u16 = 1024;
pub const DEFAULT_DISCARDERS_FLUSH_INTERVAL: u64 = 60;
pub const DEFAULT_EBPF_PATH: &str = "vigil-ebpf/target/bpfel-unknown-none/release/vigil-ebpf";

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid event {0}")]
    InvalidEvent(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Event {
    enable: bool,
}

impl Event {
    #[inline(always)]
    pub fn disable(&mut self) {
        self.enable = false
    }

    #[inline(always)]
    pub fn enable(&mut self) {
        self.enable = true
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.enable
    }
}

/// Vigil configuration structure to be used in userland
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Path of the compiled eBPF object
    pub ebpf: PathBuf,
    pub output: String,
    pub max_buffered_events: u16,
    pub workers: Option<usize>,
    /// Seconds between two flushes of the pid discarders, 0 disables flushing
    pub discarders_flush_interval: u64,
    pub events: BTreeMap<bpf_events::Type, Event>,
}

impl Default for Config {
    fn default() -> Self {
        let events = bpf_events::Type::variants()
            .into_iter()
            .filter(|t| t.is_configurable())
            .map(|t| (t, Event { enable: true }))
            .collect();

        Self {
            ebpf: DEFAULT_EBPF_PATH.into(),
            output: "/dev/stdout".into(),
            max_buffered_events: DEFAULT_MAX_BUFFERED_EVENTS,
            workers: None,
            discarders_flush_interval: DEFAULT_DISCARDERS_FLUSH_INTERVAL,
            events,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(&fs::read_to_string(p)?)?)
    }

    pub fn output<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.output = p.as_ref().to_string_lossy().to_string();
        self
    }

    pub fn enable_all(&mut self) {
        self.events.iter_mut().for_each(|(_, e)| e.enable())
    }

    pub fn disable_all(&mut self) {
        self.events.iter_mut().for_each(|(_, e)| e.disable())
    }

    fn event_mut(&mut self, name: &str) -> Result<&mut Event, Error> {
        let ty = bpf_events::Type::from_str(name)
            .map_err(|_| Error::InvalidEvent(name.to_string()))?;
        self.events
            .get_mut(&ty)
            .ok_or(Error::InvalidEvent(name.to_string()))
    }

    /// Enables only the events listed, `all` enables everything
    pub fn include<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), Error> {
        if names.iter().any(|n| n.as_ref() == "all") {
            self.enable_all();
            return Ok(());
        }

        self.disable_all();
        for n in names {
            self.event_mut(n.as_ref())?.enable();
        }
        Ok(())
    }

    /// Disables the events listed, `all` disables everything
    pub fn exclude<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), Error> {
        if names.iter().any(|n| n.as_ref() == "all") {
            self.disable_all();
            return Ok(());
        }

        for n in names {
            self.event_mut(n.as_ref())?.disable();
        }
        Ok(())
    }
}

impl TryFrom<&Config> for Filter {
    type Error = Error;

    fn try_from(value: &Config) -> Result<Self, Error> {
        let mut filter = Filter::all_disabled();

        for (ty, e) in value.events.iter() {
            if !ty.is_configurable() {
                return Err(Error::InvalidEvent(ty.to_string()));
            }
            if e.enable {
                filter.enable(*ty);
            }
        }

        Ok(filter)
    }
}

impl TryFrom<&Config> for BpfConfig {
    type Error = Error;

    fn try_from(value: &Config) -> Result<Self, Error> {
        Ok(Self {
            loader: Loader::from_own_pid(),
            filter: value.try_into()?,
        })
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;
    use bpf_events::Type;

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let s = serde_yaml::to_string(&config).unwrap();
        let de: Config = serde_yaml::from_str(&s).unwrap();

        assert_eq!(de.events, config.events);
        assert_eq!(de.max_buffered_events, DEFAULT_MAX_BUFFERED_EVENTS);
    }

    #[test]
    fn test_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
ebpf: /opt/vigil/vigil-ebpf
output: /var/log/vigil.json
max_buffered_events: 2048
workers: 2
discarders_flush_interval: 0
events:
  fork:
    enable: false
  exec:
    enable: true
  exit:
    enable: true
"#
        )
        .unwrap();

        let conf = Config::from_file(f.path()).unwrap();
        assert_eq!(conf.ebpf, PathBuf::from("/opt/vigil/vigil-ebpf"));
        assert_eq!(conf.workers, Some(2));
        assert_eq!(conf.discarders_flush_interval, 0);

        let filter = Filter::try_from(&conf).unwrap();
        assert!(filter.is_disabled(Type::Fork));
        assert!(filter.is_enabled(Type::Exec));
        assert!(filter.is_enabled(Type::Exit));
    }

    #[test]
    fn test_unknown_event_in_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "events:\n  clone:\n    enable: true\n").unwrap();
        assert!(Config::from_file(f.path()).is_err());
    }

    #[test]
    fn test_include_exclude() {
        let mut conf = Config::default();

        conf.include(&["exec"]).unwrap();
        let filter = Filter::try_from(&conf).unwrap();
        assert!(filter.is_enabled(Type::Exec));
        assert!(filter.is_disabled(Type::Fork));
        assert!(filter.is_disabled(Type::Exit));

        conf.include(&["all"]).unwrap();
        conf.exclude(&["fork", "exit"]).unwrap();
        let filter = Filter::try_from(&conf).unwrap();
        assert!(filter.is_enabled(Type::Exec));
        assert!(filter.is_disabled(Type::Fork));

        assert!(conf.exclude(&["log"]).is_err());
        assert!(conf.include(&["nope"]).is_err());
    }

    #[test]
    fn test_bpf_config_loader() {
        let bpf: BpfConfig = (&Config::default()).try_into().unwrap();
        assert!(bpf.is_loader(std::process::id()));
        assert!(bpf.filter.is_enabled(Type::Fork));
    }
}
