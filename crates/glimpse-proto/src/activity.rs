//! Activity classification and its display priority.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse activity reported by an editor session.
///
/// When one handle has several live sessions, the displayed activity is the
/// highest-priority one across all of them. The priority order is part of the
/// public contract: `Debugging > Coding > Reading > Idle > Hidden`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Activity {
    /// Activity withheld (either by the client or by preference masking).
    Hidden,
    /// Connected but not interacting.
    #[default]
    Idle,
    /// Reading code without editing.
    Reading,
    /// Actively editing.
    Coding,
    /// A debug session is running.
    Debugging,
}

impl Activity {
    /// Numeric priority used for multi-session aggregation. Higher wins.
    pub fn priority(self) -> u8 {
        match self {
            Activity::Hidden => 0,
            Activity::Idle => 1,
            Activity::Reading => 2,
            Activity::Coding => 3,
            Activity::Debugging => 4,
        }
    }

    /// The canonical wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Activity::Hidden => "Hidden",
            Activity::Idle => "Idle",
            Activity::Reading => "Reading",
            Activity::Coding => "Coding",
            Activity::Debugging => "Debugging",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activity {
    type Err = UnknownActivity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Hidden" => Ok(Activity::Hidden),
            "Idle" => Ok(Activity::Idle),
            "Reading" => Ok(Activity::Reading),
            "Coding" => Ok(Activity::Coding),
            "Debugging" => Ok(Activity::Debugging),
            other => Err(UnknownActivity(other.to_string())),
        }
    }
}

/// Error for an activity string outside the fixed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown activity: {0}")]
pub struct UnknownActivity(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_is_total_and_fixed() {
        assert!(Activity::Debugging.priority() > Activity::Coding.priority());
        assert!(Activity::Coding.priority() > Activity::Reading.priority());
        assert!(Activity::Reading.priority() > Activity::Idle.priority());
        assert!(Activity::Idle.priority() > Activity::Hidden.priority());
    }

    #[test]
    fn wire_spelling_round_trips() {
        for a in [
            Activity::Hidden,
            Activity::Idle,
            Activity::Reading,
            Activity::Coding,
            Activity::Debugging,
        ] {
            assert_eq!(a.as_str().parse::<Activity>().unwrap(), a);
        }
        assert!("coding".parse::<Activity>().is_err());
    }

    #[test]
    fn serde_uses_canonical_names() {
        let json = serde_json::to_string(&Activity::Debugging).unwrap();
        assert_eq!(json, "\"Debugging\"");
        let back: Activity = serde_json::from_str("\"Idle\"").unwrap();
        assert_eq!(back, Activity::Idle);
    }
}
