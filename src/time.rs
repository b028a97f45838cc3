//! File timestamps and the pluggable clock behind them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Timestamp attached to files: seconds since the Unix epoch plus a
/// nanosecond remainder.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileTime {
    /// Whole seconds since 1970-01-01T00:00:00Z.
    pub seconds: i64,
    /// Nanoseconds within the second, always `< 1_000_000_000`.
    pub nanos: u32,
}

impl FileTime {
    /// The Unix epoch.
    pub const EPOCH: FileTime = FileTime { seconds: 0, nanos: 0 };

    /// Builds a timestamp from whole seconds.
    pub fn from_seconds(seconds: i64) -> Self {
        FileTime { seconds, nanos: 0 }
    }

    /// Builds a timestamp from a [`SystemTime`]; times before the epoch
    /// clamp to the epoch.
    pub fn from_system(time: SystemTime) -> Self {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        FileTime { seconds: duration.as_secs() as i64, nanos: duration.subsec_nanos() }
    }

    /// Adds a duration, saturating on overflow.
    pub fn plus(self, duration: Duration) -> Self {
        let mut seconds = self.seconds.saturating_add(duration.as_secs() as i64);
        let mut nanos = self.nanos + duration.subsec_nanos();
        if nanos >= 1_000_000_000 {
            nanos -= 1_000_000_000;
            seconds = seconds.saturating_add(1);
        }
        FileTime { seconds, nanos }
    }
}

/// Source of the timestamps stamped onto files.
///
/// The default implementation reads the system clock; tests substitute a
/// fixed or scripted clock through
/// [`ConfigBuilder::file_time_source`](crate::config::ConfigBuilder::file_time_source).
pub trait FileTimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> FileTime;
}

/// [`FileTimeSource`] backed by [`SystemTime::now`].
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl FileTimeSource for SystemTimeSource {
    fn now(&self) -> FileTime {
        FileTime::from_system(SystemTime::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_seconds_then_nanos() {
        let early = FileTime { seconds: 5, nanos: 10 };
        let later_nanos = FileTime { seconds: 5, nanos: 11 };
        let later_seconds = FileTime { seconds: 6, nanos: 0 };
        assert!(early < later_nanos);
        assert!(later_nanos < later_seconds);
    }

    #[test]
    fn plus_carries_nanos_into_seconds() {
        let base = FileTime { seconds: 1, nanos: 900_000_000 };
        let bumped = base.plus(Duration::from_millis(200));
        assert_eq!(bumped, FileTime { seconds: 2, nanos: 100_000_000 });
    }

    #[test]
    fn system_source_is_not_before_epoch() {
        let now = SystemTimeSource.now();
        assert!(now >= FileTime::EPOCH);
    }
}
