use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a record in the shared log.
///
/// Positions are assigned by the log on append and grow monotonically;
/// the total order of the log is the numeric order of its positions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition(u64);

impl LogPosition {
    /// The first position the log hands out.
    pub const ZERO: Self = Self(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The position immediately before this one, if any.
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Debug for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upper bound of a read or sync request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadBound {
    /// Read up to and including this position.
    At(LogPosition),
    /// Read to whatever the tail of the log is at the time of the read.
    Tail,
}

impl ReadBound {
    /// Whether `position` falls within this bound.
    pub fn admits(&self, position: LogPosition) -> bool {
        match self {
            Self::At(limit) => position <= *limit,
            Self::Tail => true,
        }
    }

    /// Whether a replica at `version` already satisfies this bound without
    /// consulting the log. `Tail` is never satisfied locally.
    pub fn is_satisfied_by(&self, version: Option<LogPosition>) -> bool {
        match (self, version) {
            (Self::At(limit), Some(v)) => v >= *limit,
            _ => false,
        }
    }
}

impl fmt::Display for ReadBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(p) => write!(f, "{p}"),
            Self::Tail => write!(f, "TAIL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn prev_of_zero_is_none() {
        assert_eq!(LogPosition::ZERO.prev(), None);
        assert_eq!(LogPosition::new(5).prev(), Some(LogPosition::new(4)));
    }

    #[test]
    fn tail_admits_everything_but_is_never_satisfied_locally() {
        assert!(ReadBound::Tail.admits(LogPosition::new(u64::MAX)));
        assert!(!ReadBound::Tail.is_satisfied_by(Some(LogPosition::new(u64::MAX))));
    }

    #[test]
    fn unsynced_version_satisfies_nothing() {
        assert!(!ReadBound::At(LogPosition::ZERO).is_satisfied_by(None));
    }

    #[test]
    fn display_formats() {
        assert_eq!(ReadBound::Tail.to_string(), "TAIL");
        assert_eq!(ReadBound::At(LogPosition::new(7)).to_string(), "7");
        assert_eq!(format!("{:?}", LogPosition::new(3)), "@3");
    }

    proptest! {
        #[test]
        fn bound_satisfaction_matches_numeric_order(limit in 0u64..1000, version in 0u64..1000) {
            let bound = ReadBound::At(LogPosition::new(limit));
            prop_assert_eq!(bound.is_satisfied_by(Some(LogPosition::new(version))), version >= limit);
            prop_assert_eq!(bound.admits(LogPosition::new(version)), version <= limit);
        }
    }
}
