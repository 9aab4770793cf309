//! The injected "effective time" oracle: wall-clock sources are never read
//! directly, only passed in, so a scheduling pass stays a pure function of
//! its inputs.
//!
//! Built on `hifitime` for all epoch/duration arithmetic, since the data
//! model's timestamps (`when`, `when_member`, `when_online`, `lock_time`,
//! ...) are all epoch-seconds values that need saturating/ordered
//! arithmetic identical to what a real scheduler does.

use hifitime::{Duration, Epoch, TimeScale, Unit};

/// A point in time, expressed as seconds since the Unix epoch. Thin wrapper
/// around [`hifitime::Epoch`] so call sites read in terms of plain epoch
/// seconds, matching the source data model.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EffectiveTime(i64);

impl EffectiveTime {
    pub const NEVER_SEEN: EffectiveTime = EffectiveTime(-1);
    pub const NOT_SET: EffectiveTime = EffectiveTime(0);

    pub fn from_epoch_seconds(seconds: i64) -> EffectiveTime {
        EffectiveTime(seconds)
    }

    pub fn epoch_seconds(self) -> i64 {
        self.0
    }

    pub fn is_set(self) -> bool {
        self.0 > 0
    }

    pub fn is_never_seen(self) -> bool {
        self.0 < 0
    }

    pub fn as_hifitime(self) -> Epoch {
        Epoch::from_unix_seconds(self.0 as f64).to_time_scale(TimeScale::UTC)
    }

    pub fn elapsed_since(self, earlier: EffectiveTime) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Whether at least `seconds` have elapsed since `earlier`. Used
    /// throughout status unpacking for failure-timeout / pending-timeout /
    /// shutdown-lock comparisons.
    pub fn at_least_elapsed(self, earlier: EffectiveTime, seconds: i64) -> bool {
        self.elapsed_since(earlier) >= seconds
    }

    pub fn add_seconds(self, seconds: i64) -> EffectiveTime {
        EffectiveTime(self.0.saturating_add(seconds))
    }
}

/// A configured duration, parsed from either plain integer seconds or the
/// `NNs`/`NNmin`/`NNh`/`NNms` suffix notation used throughout the cluster
/// option table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ConfiguredDuration(i64);

impl ConfiguredDuration {
    pub const ZERO: ConfiguredDuration = ConfiguredDuration(0);

    pub fn from_seconds(seconds: i64) -> Self {
        ConfiguredDuration(seconds.max(0))
    }

    pub fn seconds(self) -> i64 {
        self.0
    }

    pub fn is_disabled(self) -> bool {
        self.0 == 0
    }

    pub fn parse(text: &str) -> Result<Self, DurationParseError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(DurationParseError(text.to_string()));
        }
        if let Ok(seconds) = trimmed.parse::<i64>() {
            return Ok(ConfiguredDuration::from_seconds(seconds));
        }
        let split_at = trimmed
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| DurationParseError(text.to_string()))?;
        let (value, unit) = trimmed.split_at(split_at);
        let value: f64 = value
            .parse()
            .map_err(|_| DurationParseError(text.to_string()))?;
        let unit = match unit {
            "ms" => Unit::Millisecond,
            "s" | "sec" => Unit::Second,
            "m" | "min" => Unit::Minute,
            "h" | "hr" => Unit::Hour,
            _ => return Err(DurationParseError(text.to_string())),
        };
        let duration: Duration = value * unit;
        Ok(ConfiguredDuration::from_seconds(
            duration.to_seconds().round() as i64
        ))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid duration literal: {0}")]
pub struct DurationParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_seconds() {
        assert_eq!(ConfiguredDuration::parse("60").unwrap().seconds(), 60);
    }

    #[test]
    fn parses_suffixed_units() {
        assert_eq!(ConfiguredDuration::parse("15min").unwrap().seconds(), 900);
        assert_eq!(ConfiguredDuration::parse("1h").unwrap().seconds(), 3600);
    }

    #[test]
    fn zero_means_disabled() {
        assert!(ConfiguredDuration::from_seconds(0).is_disabled());
    }

    #[test]
    fn elapsed_since_tracks_pending_timeout() {
        let t0 = EffectiveTime::from_epoch_seconds(1000);
        let t1 = EffectiveTime::from_epoch_seconds(1100);
        assert!(t1.at_least_elapsed(t0, 100));
        assert!(!t1.at_least_elapsed(t0, 101));
    }
}
