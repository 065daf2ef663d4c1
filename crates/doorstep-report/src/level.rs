//! Issue severities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ReportError, Result};

/// Severity of an issue.
///
/// Ordered from most to least severe; iteration over [`Level::ALL`] follows
/// the order issues appear in a compiled report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Error,
    Warning,
    Info,
}

impl Level {
    /// All severities in compiled-report order.
    pub const ALL: [Level; 3] = [Level::Error, Level::Warning, Level::Info];

    /// Map a numeric log level (40/30/20) onto a severity.
    pub fn from_log_level(level: u8) -> Result<Self> {
        match level {
            40 => Ok(Level::Error),
            30 => Ok(Level::Warning),
            20 => Ok(Level::Info),
            other => Err(ReportError::InvalidSeverity(other.to_string())),
        }
    }

    /// Numeric log level for this severity.
    pub fn log_level(self) -> u8 {
        match self {
            Level::Error => 40,
            Level::Warning => 30,
            Level::Info => 20,
        }
    }

    /// Key of the issue list for this severity in a compiled table.
    pub fn table_key(self) -> &'static str {
        match self {
            Level::Error => "errors",
            Level::Warning => "warnings",
            Level::Info => "informations",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Error => "ERROR",
            Level::Warning => "WARNING",
            Level::Info => "INFO",
        };
        f.write_str(name)
    }
}

impl FromStr for Level {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" | "errors" => Ok(Level::Error),
            "warning" | "warn" | "warnings" => Ok(Level::Warning),
            "info" | "information" | "informations" => Ok(Level::Info),
            _ => Err(ReportError::InvalidSeverity(s.to_string())),
        }
    }
}

/// Anything that can name a severity.
///
/// Lets [`Report::add_issue`](crate::Report::add_issue) accept a [`Level`],
/// a severity name or a numeric log level, rejecting anything else with
/// [`ReportError::InvalidSeverity`].
pub trait IntoLevel {
    fn into_level(self) -> Result<Level>;
}

impl IntoLevel for Level {
    fn into_level(self) -> Result<Level> {
        Ok(self)
    }
}

impl IntoLevel for &str {
    fn into_level(self) -> Result<Level> {
        self.parse()
    }
}

impl IntoLevel for u8 {
    fn into_level(self) -> Result<Level> {
        Level::from_log_level(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("ERROR".parse::<Level>().unwrap(), Level::Error);
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("informations".parse::<Level>().unwrap(), Level::Info);
    }

    #[test]
    fn test_parse_unknown() {
        let err = "critical".parse::<Level>().unwrap_err();
        assert_eq!(err, ReportError::InvalidSeverity("critical".into()));
    }

    #[test]
    fn test_log_levels() {
        for level in Level::ALL {
            assert_eq!(Level::from_log_level(level.log_level()).unwrap(), level);
        }
        assert!(Level::from_log_level(50).is_err());
        assert!(10u8.into_level().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Level::Warning.to_string(), "WARNING");
        assert_eq!(Level::Info.table_key(), "informations");
    }
}
