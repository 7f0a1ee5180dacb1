use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

/// Provider name used for errors raised while parsing caller input.
const REQUEST_SOURCE: &str = "request";

/// Bar interval.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::FourHours,
        Self::OneDay,
        Self::OneWeek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
        }
    }

    /// Length of one bar in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 5 * 60,
            Self::FifteenMinutes => 15 * 60,
            Self::ThirtyMinutes => 30 * 60,
            Self::OneHour => 60 * 60,
            Self::FourHours => 4 * 60 * 60,
            Self::OneDay => 24 * 60 * 60,
            Self::OneWeek => 7 * 24 * 60 * 60,
        }
    }

    pub fn is_intraday(&self) -> bool {
        self.seconds() < Self::OneDay.seconds()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ProviderError;

    /// Accepts the canonical form (`1h`) plus a few common spellings
    /// (`60m`, `1H`, `D`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let timeframe = match normalized.as_str() {
            "1m" | "1min" => Self::OneMinute,
            "5m" | "5min" => Self::FiveMinutes,
            "15m" | "15min" => Self::FifteenMinutes,
            "30m" | "30min" => Self::ThirtyMinutes,
            "1h" | "60m" | "1hour" => Self::OneHour,
            "4h" | "240m" | "4hour" => Self::FourHours,
            "1d" | "d" | "1day" => Self::OneDay,
            "1w" | "w" | "1week" => Self::OneWeek,
            _ => return Err(ProviderError::invalid_timeframe(REQUEST_SOURCE, s)),
        };
        Ok(timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderErrorCode;

    #[test]
    fn test_parse_canonical_round_trips_display() {
        for timeframe in Timeframe::ALL {
            assert_eq!(timeframe.as_str().parse::<Timeframe>().unwrap(), timeframe);
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("60m".parse::<Timeframe>().unwrap(), Timeframe::OneHour);
        assert_eq!(" 1H ".parse::<Timeframe>().unwrap(), Timeframe::OneHour);
        assert_eq!("D".parse::<Timeframe>().unwrap(), Timeframe::OneDay);
    }

    #[test]
    fn test_parse_unknown_is_invalid_timeframe() {
        let err = "7m".parse::<Timeframe>().unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::InvalidTimeframe);
        assert_eq!(err.provider, "request");
    }

    #[test]
    fn test_intraday() {
        assert!(Timeframe::FourHours.is_intraday());
        assert!(!Timeframe::OneDay.is_intraday());
        assert_eq!(Timeframe::OneWeek.seconds(), 604_800);
    }
}
