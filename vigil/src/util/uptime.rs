use std::{
    fs, io,
    num::ParseFloatError,
    time::{Duration, TryFromFloatSecsError},
};

use chrono::{DateTime, OutOfRangeError, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read uptime")]
    Read,
    #[error("parse: {0}")]
    ParseFloat(#[from] ParseFloatError),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("try_from: {0}")]
    TryFromFloatSecs(#[from] TryFromFloatSecsError),
    #[error("oor: {0}")]
    OutOfRange(#[from] OutOfRangeError),
    #[error("out of range date computation")]
    ComputeOutOfRange,
}

#[derive(Debug)]
pub struct Uptime(f64, chrono::Duration);

impl Uptime {
    #[inline]
    pub fn from_sys() -> Result<Self, Error> {
        Self::parse(&fs::read_to_string("/proc/uptime")?)
    }

    /// Parses the content of `/proc/uptime`
    pub fn parse(content: &str) -> Result<Self, Error> {
        let uptime_seconds: f64 = content
            .split_whitespace()
            .next()
            .ok_or(Error::Read)?
            .parse()?;

        Ok(Self(
            uptime_seconds,
            chrono::Duration::from_std(Duration::try_from_secs_f64(uptime_seconds)?)?,
        ))
    }

    #[inline(always)]
    pub fn as_secs(&self) -> f64 {
        self.0
    }

    #[inline(always)]
    pub fn boot_time(&self) -> Result<DateTime<Utc>, Error> {
        Utc::now()
            .checked_sub_signed(self.1)
            .ok_or(Error::ComputeOutOfRange)
    }
}

/// Converts kernel timestamps, nanoseconds since boot, to UTC dates
#[derive(Debug, Clone, Copy)]
pub struct BootClock {
    boot_time: DateTime<Utc>,
}

impl BootClock {
    pub fn from_sys() -> Result<Self, Error> {
        Ok(Self {
            boot_time: Uptime::from_sys()?.boot_time()?,
        })
    }

    pub fn with_boot_time(boot_time: DateTime<Utc>) -> Self {
        Self { boot_time }
    }

    #[inline]
    pub fn to_utc(&self, ktime_ns: u64) -> DateTime<Utc> {
        self.boot_time + chrono::Duration::nanoseconds(ktime_ns as i64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        let u = Uptime::parse("350735.47 234388.90\n").unwrap();
        assert_eq!(u.as_secs(), 350735.47);
        assert!(u.boot_time().unwrap() < Utc::now());

        assert!(matches!(Uptime::parse(""), Err(Error::Read)));
        assert!(matches!(Uptime::parse("abc 1.0"), Err(Error::ParseFloat(_))));
    }

    #[test]
    fn test_boot_clock() {
        let boot = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = BootClock::with_boot_time(boot);

        assert_eq!(clock.to_utc(0), boot);
        assert_eq!(
            clock.to_utc(1_500_000_000),
            DateTime::from_timestamp(1_700_000_001, 500_000_000).unwrap()
        );
    }
}
