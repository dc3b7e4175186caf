//! Check results and their performance data.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use super::status::Status;

/// Unit of measure appended to a performance-data value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitOfMeasure {
    Microseconds,
    Milliseconds,
    Seconds,
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
    Percentage,
    Counter,
}

impl UnitOfMeasure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Microseconds => "us",
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
            Self::Bytes => "B",
            Self::Kilobytes => "KB",
            Self::Megabytes => "MB",
            Self::Gigabytes => "GB",
            Self::Terabytes => "TB",
            Self::Percentage => "%",
            Self::Counter => "c",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid unit of measure: {0}")]
pub struct InvalidUnit(pub String);

impl FromStr for UnitOfMeasure {
    type Err = InvalidUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "us" => Ok(Self::Microseconds),
            "ms" => Ok(Self::Milliseconds),
            "s" => Ok(Self::Seconds),
            "B" => Ok(Self::Bytes),
            "KB" => Ok(Self::Kilobytes),
            "MB" => Ok(Self::Megabytes),
            "GB" => Ok(Self::Gigabytes),
            "TB" => Ok(Self::Terabytes),
            "%" => Ok(Self::Percentage),
            "c" => Ok(Self::Counter),
            _ => Err(InvalidUnit(s.to_string())),
        }
    }
}

/// A single `label=value[UOM];warn;crit;min;max` token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceData {
    pub label: String,
    pub value: f64,
    pub unit: Option<UnitOfMeasure>,
    /// Warning range, in threshold syntax, passed through verbatim
    pub warning: Option<String>,
    /// Critical range, in threshold syntax, passed through verbatim
    pub critical: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PerformanceData {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
            unit: None,
            warning: None,
            critical: None,
            min: None,
            max: None,
        }
    }

    pub fn with_unit(mut self, unit: UnitOfMeasure) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn with_thresholds(
        mut self,
        warning: Option<impl Into<String>>,
        critical: Option<impl Into<String>>,
    ) -> Self {
        self.warning = warning.map(Into::into);
        self.critical = critical.map(Into::into);
        self
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }
}

impl fmt::Display for PerformanceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.unit.map(|u| u.as_str()).unwrap_or("");
        let mut fields = vec![
            format!("{}{}", self.value, unit),
            self.warning.clone().unwrap_or_default(),
            self.critical.clone().unwrap_or_default(),
            self.min.map(|v| v.to_string()).unwrap_or_default(),
            self.max.map(|v| v.to_string()).unwrap_or_default(),
        ];
        while fields.last().is_some_and(|f| f.is_empty()) {
            fields.pop();
        }

        if self.label.contains(' ') {
            write!(f, "'{}'={}", self.label, fields.join(";"))
        } else {
            write!(f, "{}={}", self.label, fields.join(";"))
        }
    }
}

/// The outcome of one plugin invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnValue {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub performance_data: Vec<PerformanceData>,
}

impl ReturnValue {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            performance_data: Vec::new(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Status::Ok, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Status::Unknown, message)
    }

    pub fn with_performance_data(mut self, data: PerformanceData) -> Self {
        self.performance_data.push(data);
        self
    }

    /// Render the text carried in a response packet: the message, followed by
    /// `|` and the space-separated performance data when there is any.
    pub fn to_payload(&self) -> String {
        if self.performance_data.is_empty() {
            return self.message.clone();
        }

        let perf: Vec<String> = self.performance_data.iter().map(|p| p.to_string()).collect();
        format!("{}|{}", self.message, perf.join(" "))
    }
}
