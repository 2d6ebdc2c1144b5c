//! Channel mode and channel-index derivation.
//!
//! In multi-channel mode a message's channel is a stateless function of its
//! sender alias: `len(alias) mod N`. This is a coarse partitioning scheme,
//! not an addressing scheme. Unrelated aliases of equal length share a
//! channel, and it needs no coordination between clients.

use crate::error::{RelayError, RelayResult};
use std::fmt;

/// Number of channels used when none is configured.
pub const DEFAULT_CHANNEL_COUNT: usize = 25;

/// How inbound messages are partitioned into broadcast groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// One channel; every publish lands on index 0.
    Single,
    /// `N` independent channels selected by alias length.
    Multi(usize),
}

impl Default for ChannelMode {
    fn default() -> Self {
        Self::Multi(DEFAULT_CHANNEL_COUNT)
    }
}

impl ChannelMode {
    /// Multi-channel mode with `count` channels. `count` must be positive.
    pub fn multi(count: usize) -> RelayResult<Self> {
        if count == 0 {
            return Err(RelayError::InvalidConfiguration(
                "channel count must be greater than 0".into(),
            ));
        }
        Ok(Self::Multi(count))
    }

    /// Number of channels this mode allocates.
    pub fn channel_count(self) -> usize {
        match self {
            Self::Single => 1,
            Self::Multi(count) => count,
        }
    }

    /// Channel index a message from `alias` is routed to.
    ///
    /// Length is measured in UTF-16 code units so that browser clients
    /// computing `alias.length` agree with the relay.
    pub fn index_for(self, alias: &str) -> usize {
        match self {
            Self::Single => 0,
            Self::Multi(0) => 0,
            Self::Multi(count) => (alias.encode_utf16().count() % count).min(count - 1),
        }
    }

    /// Whether `index` addresses an existing channel under this mode.
    pub fn contains(self, index: usize) -> bool {
        index < self.channel_count()
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single-channel"),
            Self::Multi(count) => write!(f, "multi-channel ({count})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_mode_is_always_zero() {
        let mode = ChannelMode::Single;
        assert_eq!(mode.index_for("bob"), 0);
        assert_eq!(mode.index_for("a much longer alias"), 0);
        assert_eq!(mode.channel_count(), 1);
    }

    #[test]
    fn multi_mode_uses_alias_length() {
        let mode = ChannelMode::default();
        assert_eq!(mode.channel_count(), 25);
        assert_eq!(mode.index_for("bob"), 3);
        assert_eq!(mode.index_for("amy"), 3);
        assert_eq!(mode.index_for("alice"), 5);
    }

    #[test]
    fn multi_mode_wraps() {
        let mode = ChannelMode::multi(4).unwrap();
        assert_eq!(mode.index_for("abcd"), 0);
        assert_eq!(mode.index_for("abcdefg"), 3);
        let long = "x".repeat(26);
        assert_eq!(ChannelMode::default().index_for(&long), 1);
    }

    #[test]
    fn length_counts_utf16_units() {
        let mode = ChannelMode::default();
        assert_eq!(mode.index_for("지수"), 2);
        // One astral-plane char is two UTF-16 code units.
        assert_eq!(mode.index_for("🦀"), 2);
    }

    #[test]
    fn zero_channels_rejected() {
        assert!(matches!(
            ChannelMode::multi(0),
            Err(RelayError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn contains_checks_range() {
        let mode = ChannelMode::multi(3).unwrap();
        assert!(mode.contains(2));
        assert!(!mode.contains(3));
        assert!(ChannelMode::Single.contains(0));
        assert!(!ChannelMode::Single.contains(1));
    }
}
