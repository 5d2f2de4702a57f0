//! Temporal query parameters and the upstream time window they map to.

use crate::error::{BridgeError, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::str::FromStr;

/// How far back a `before` query reaches
pub const BEFORE_LOOKBACK_DAYS: i64 = 30;

/// NGSI-LD temporal relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRel {
    Before,
    After,
    Between,
}

impl FromStr for TimeRel {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "before" => Ok(TimeRel::Before),
            "after" => Ok(TimeRel::After),
            "between" => Ok(TimeRel::Between),
            other => Err(BridgeError::invalid(
                "timerel",
                format!("expected before, after or between, got {other}"),
            )),
        }
    }
}

/// `_from` / `_to` bounds sent upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: String,
    pub to: Option<String>,
}

impl TimeWindow {
    /// Resolve temporal query parameters relative to `now`.
    ///
    /// Times are percent-decoded once more, as clients send them double
    /// encoded (`%253A`).
    pub fn resolve(
        timerel: Option<&str>,
        time: Option<&str>,
        end_time: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let timerel = timerel
            .filter(|t| !t.is_empty())
            .map(TimeRel::from_str)
            .transpose()?;
        let time = decode("time", time)?.ok_or_else(|| BridgeError::missing("time"))?;
        let end_time = decode("endTime", end_time)?;

        match timerel {
            Some(TimeRel::After) => Ok(Self {
                from: time,
                to: Some(to_iso(now)),
            }),
            Some(TimeRel::Before) => {
                let end = parse("time", &time)?;
                let start = end - Duration::days(BEFORE_LOOKBACK_DAYS);
                Ok(Self {
                    from: to_iso(start),
                    to: Some(time),
                })
            }
            Some(TimeRel::Between) => {
                let end_time = end_time.ok_or_else(|| BridgeError::missing("endTime"))?;
                Ok(Self {
                    from: time,
                    to: Some(end_time),
                })
            }
            None => Ok(Self {
                from: time,
                to: end_time,
            }),
        }
    }
}

fn decode(name: &str, value: Option<&str>) -> Result<Option<String>> {
    match value.filter(|v| !v.is_empty()) {
        Some(raw) => urlencoding::decode(raw)
            .map(|decoded| Some(decoded.into_owned()))
            .map_err(|e| BridgeError::invalid(name, e.to_string())),
        None => Ok(None),
    }
}

fn parse(name: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| BridgeError::invalid(name, format!("{value}: {e}")))
}

fn to_iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}
