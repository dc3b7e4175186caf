use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result status of a check, as carried in the response packet's result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl Status {
    /// Wire value of the status (the Nagios plugin exit code).
    pub fn code(&self) -> i16 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Unknown => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::Warning),
            2 => Some(Self::Critical),
            3 => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Severity rank used for comparisons.
    ///
    /// Differs from [`Status::code`]: an UNKNOWN result ranks below CRITICAL.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Unknown => 2,
            Self::Critical => 3,
        }
    }

    pub fn is_worse_than(&self, other: Status) -> bool {
        self.severity() > other.severity()
    }

    /// The most severe status of `statuses`, or OK when empty.
    pub fn worst<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
        statuses.into_iter().max().unwrap_or(Status::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status: {0}")]
pub struct InvalidStatus(pub String);

/// Accepts the status name in any case, or its numeric code.
impl FromStr for Status {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "OK" | "0" => Ok(Self::Ok),
            "WARNING" | "1" => Ok(Self::Warning),
            "CRITICAL" | "2" => Ok(Self::Critical),
            "UNKNOWN" | "3" => Ok(Self::Unknown),
            _ => Err(InvalidStatus(s.to_string())),
        }
    }
}

impl PartialOrd for Status {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Status {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity().cmp(&other.severity())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for status in [Status::Ok, Status::Warning, Status::Critical, Status::Unknown] {
            assert_eq!(Status::from_code(status.code() as i64), Some(status));
        }
        assert_eq!(Status::from_code(4), None);
        assert_eq!(Status::from_code(-1), None);
    }

    #[test]
    fn test_severity_is_not_wire_order() {
        assert!(Status::Critical.code() < Status::Unknown.code());
        assert!(Status::Critical.is_worse_than(Status::Unknown));
        assert!(Status::Unknown.is_worse_than(Status::Warning));
        assert!(Status::Warning.is_worse_than(Status::Ok));
        assert!(!Status::Ok.is_worse_than(Status::Ok));
    }

    #[test]
    fn test_worst() {
        assert_eq!(Status::worst([]), Status::Ok);
        assert_eq!(
            Status::worst([Status::Ok, Status::Unknown, Status::Warning]),
            Status::Unknown
        );
        assert_eq!(
            Status::worst([Status::Unknown, Status::Critical]),
            Status::Critical
        );
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("warning".parse::<Status>(), Ok(Status::Warning));
        assert_eq!(" CRITICAL ".parse::<Status>(), Ok(Status::Critical));
        assert_eq!("3".parse::<Status>(), Ok(Status::Unknown));
        let err = "bogus".parse::<Status>().unwrap_err();
        assert_eq!(err.to_string(), "invalid status: bogus");
    }
}
