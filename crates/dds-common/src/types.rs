//! Shared domain types for the DDS workspace
//!
//! The extract API addresses windows with minute-precision UTC timestamps in
//! the `%Y-%m-%dT%H:%MZ` format; [`WindowTime`] owns parsing, formatting, and
//! serde for that representation so the rest of the workspace can pass
//! `chrono` values around.

use crate::error::{DdsError, Result};
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire format for extract window boundaries.
pub const WINDOW_TIME_FORMAT: &str = "%Y-%m-%dT%H:%MZ";

/// The kind of extract offered by the vendor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractType {
    /// Complete snapshot of all source data
    Full,
    /// Changes since the previous incremental window
    Incremental,
    /// Audit/log records
    Log,
}

impl ExtractType {
    /// Query-parameter value expected by the extract API.
    pub fn api_value(self) -> &'static str {
        match self {
            ExtractType::Full => "full_directdata",
            ExtractType::Incremental => "incremental_directdata",
            ExtractType::Log => "log_directdata",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtractType::Full => "full",
            ExtractType::Incremental => "incremental",
            ExtractType::Log => "log",
        }
    }
}

impl std::str::FromStr for ExtractType {
    type Err = DdsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(ExtractType::Full),
            "incremental" => Ok(ExtractType::Incremental),
            "log" => Ok(ExtractType::Log),
            _ => Err(DdsError::InvalidExtractType(s.to_string())),
        }
    }
}

impl std::fmt::Display for ExtractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects the credential/target profile for a pipeline run.
///
/// Different profiles are fully independent: they may point at different
/// vendor tenants, storage prefixes, and warehouse schemas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileKey(String);

impl ProfileKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProfileKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A minute-precision UTC window boundary.
///
/// Serializes as the API wire format (`2024-04-19T00:00Z`) rather than full
/// RFC 3339, and truncates seconds on construction so round-trips are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowTime(DateTime<Utc>);

impl WindowTime {
    /// Construct from any UTC timestamp, truncating below minute precision.
    pub fn new(dt: DateTime<Utc>) -> Self {
        let truncated = dt
            .with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(dt);
        Self(truncated)
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Parse the `%Y-%m-%dT%H:%MZ` wire format.
    pub fn parse(value: &str) -> Result<Self> {
        let naive =
            NaiveDateTime::parse_from_str(value, WINDOW_TIME_FORMAT).map_err(|_| {
                DdsError::InvalidWindowTime {
                    value: value.to_string(),
                    expected: WINDOW_TIME_FORMAT,
                }
            })?;
        Ok(Self(naive.and_utc()))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for WindowTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(WINDOW_TIME_FORMAT))
    }
}

impl std::str::FromStr for WindowTime {
    type Err = DdsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<DateTime<Utc>> for WindowTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::new(dt)
    }
}

impl Serialize for WindowTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WindowTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        WindowTime::parse(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_extract_type_from_str() {
        assert_eq!("full".parse::<ExtractType>().unwrap(), ExtractType::Full);
        assert_eq!(
            "INCREMENTAL".parse::<ExtractType>().unwrap(),
            ExtractType::Incremental
        );
        assert_eq!("Log".parse::<ExtractType>().unwrap(), ExtractType::Log);
        assert!("delta".parse::<ExtractType>().is_err());
    }

    #[test]
    fn test_extract_type_api_value() {
        assert_eq!(ExtractType::Full.api_value(), "full_directdata");
        assert_eq!(
            ExtractType::Incremental.api_value(),
            "incremental_directdata"
        );
        assert_eq!(ExtractType::Log.api_value(), "log_directdata");
    }

    #[test]
    fn test_window_time_round_trip() {
        let parsed = WindowTime::parse("2024-04-19T00:00Z").unwrap();
        assert_eq!(parsed.to_string(), "2024-04-19T00:00Z");
    }

    #[test]
    fn test_window_time_rejects_rfc3339() {
        assert!(WindowTime::parse("2024-04-19T00:00:00Z").is_err());
        assert!(WindowTime::parse("not a time").is_err());
    }

    #[test]
    fn test_window_time_truncates_seconds() {
        let dt = Utc.with_ymd_and_hms(2024, 4, 19, 10, 30, 45).unwrap();
        let wt = WindowTime::new(dt);
        assert_eq!(wt.to_string(), "2024-04-19T10:30Z");
        assert_eq!(WindowTime::parse(&wt.to_string()).unwrap(), wt);
    }

    #[test]
    fn test_window_time_serde() {
        let wt = WindowTime::parse("2024-04-19T00:00Z").unwrap();
        let json = serde_json::to_string(&wt).unwrap();
        assert_eq!(json, "\"2024-04-19T00:00Z\"");
        let back: WindowTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wt);
    }

    #[test]
    fn test_window_time_ordering() {
        let earlier = WindowTime::parse("2024-04-19T00:00Z").unwrap();
        let later = WindowTime::parse("2024-04-19T00:15Z").unwrap();
        assert!(earlier < later);
    }
}
