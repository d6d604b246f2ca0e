//! Transfer options chosen by the sender.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long a tunnel stays downloadable, in whole minutes.
///
/// Always within `MIN..=MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SaveMinutes(u32);

impl SaveMinutes {
    /// Shortest allowed lifetime.
    pub const MIN: u32 = 1;
    /// Longest allowed lifetime.
    pub const MAX: u32 = 60;
    /// Lifetime used when the sender does not pick one.
    pub const DEFAULT: SaveMinutes = SaveMinutes(15);

    /// Validate a lifetime in minutes.
    pub fn new(minutes: u32) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&minutes).then_some(Self(minutes))
    }

    /// The number of minutes.
    pub fn get(self) -> u32 {
        self.0
    }

    /// The lifetime as a duration.
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(u64::from(self.0) * 60)
    }
}

impl Default for SaveMinutes {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for SaveMinutes {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Self::new(minutes).ok_or_else(|| {
            format!(
                "lifetime must be between {} and {} minutes, got {}",
                Self::MIN,
                Self::MAX,
                minutes
            )
        })
    }
}

impl From<SaveMinutes> for u32 {
    fn from(value: SaveMinutes) -> Self {
        value.0
    }
}

/// Metadata a sender attaches to an upload through directives.
///
/// Each field is `Some` only when the matching directive appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Display name for the download page (`from=`).
    pub from: Option<String>,
    /// Note shown next to the file (`msg=`).
    pub message: Option<String>,
    /// Name the file is delivered under (`filename=`).
    pub filename: Option<String>,
    /// Custom lifetime (`t=`).
    pub save: Option<SaveMinutes>,
}

impl TransferOptions {
    /// The lifetime to arm: the sender's `t` if given, else `default`.
    pub fn effective_ttl(&self, default: SaveMinutes) -> SaveMinutes {
        self.save.unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive() {
        assert!(SaveMinutes::new(0).is_none());
        assert_eq!(SaveMinutes::new(1).map(SaveMinutes::get), Some(1));
        assert_eq!(SaveMinutes::new(60).map(SaveMinutes::get), Some(60));
        assert!(SaveMinutes::new(61).is_none());
    }

    #[test]
    fn default_is_fifteen_minutes() {
        assert_eq!(SaveMinutes::default().as_duration(), Duration::from_secs(900));
    }

    #[test]
    fn effective_ttl_prefers_sender_choice() {
        let mut options = TransferOptions::default();
        assert_eq!(options.effective_ttl(SaveMinutes::DEFAULT), SaveMinutes::DEFAULT);

        options.save = SaveMinutes::new(5);
        assert_eq!(options.effective_ttl(SaveMinutes::DEFAULT).get(), 5);
    }

    #[test]
    fn deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<SaveMinutes>("30").is_ok());
        assert!(serde_json::from_str::<SaveMinutes>("0").is_err());
        assert!(serde_json::from_str::<SaveMinutes>("90").is_err());
    }
}
