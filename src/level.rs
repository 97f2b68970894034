use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FaultlineError;

/// Alarm severity, syslog-style: `Emergency` is the most severe, `Debug` the
/// least. Declaration order doubles as severity order so `#[derive(Ord)]`
/// gives us the right comparison for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Level {
    /// Default level for a leaf alarm (SPEC_FULL.md §3).
    pub const fn default_leaf() -> Self {
        Level::Warning
    }

    /// Default level for an engine-created temporary (SPEC_FULL.md §3).
    pub const fn default_temporary() -> Self {
        Level::Debug
    }

    /// True if `self` is at least as severe as `threshold` (lower variant
    /// index ⇒ more severe, matching [`Level`]'s declaration order).
    pub fn at_least(self, threshold: Level) -> bool {
        self <= threshold
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Emergency => "emergency",
            Level::Alert => "alert",
            Level::Critical => "critical",
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Notice => "notice",
            Level::Info => "info",
            Level::Debug => "debug",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Level {
    type Err = FaultlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emergency" => Ok(Level::Emergency),
            "alert" => Ok(Level::Alert),
            "critical" => Ok(Level::Critical),
            "error" => Ok(Level::Error),
            "warning" => Ok(Level::Warning),
            "notice" => Ok(Level::Notice),
            "info" => Ok(Level::Info),
            "debug" => Ok(Level::Debug),
            other => Err(FaultlineError::Validation(format!("unknown level: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergency_is_the_most_severe() {
        assert!(Level::Emergency < Level::Debug);
        assert!(Level::Emergency.at_least(Level::Warning));
        assert!(!Level::Debug.at_least(Level::Warning));
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        for level in [
            Level::Emergency,
            Level::Alert,
            Level::Critical,
            Level::Error,
            Level::Warning,
            Level::Notice,
            Level::Info,
            Level::Debug,
        ] {
            assert_eq!(level.to_string().parse::<Level>().unwrap(), level);
        }
    }

    #[test]
    fn rejects_unknown_level_names() {
        assert!("glorious".parse::<Level>().is_err());
    }
}
