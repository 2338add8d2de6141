// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Temporal values.
//!
//! These types mirror the wire representation: raw counts of days, seconds,
//! and nanoseconds. Thin conversion helpers into [`chrono`] types are
//! provided where the mapping is lossless.

use std::str::FromStr;

use chrono::{
    DateTime as ChronoDateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime,
    Offset, TimeZone, Timelike, Utc,
};

// `1970-01-01` in chrono's days-from-common-era counting.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// A date without a time zone: days since `1970-01-01`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub days: i64,
}

impl Date {
    pub fn from_naive(date: NaiveDate) -> Self {
        Self {
            days: i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE,
        }
    }

    pub fn as_naive(&self) -> Option<NaiveDate> {
        let days_from_ce = i32::try_from(self.days + UNIX_EPOCH_DAYS_FROM_CE).ok()?;
        NaiveDate::from_num_days_from_ce_opt(days_from_ce)
    }
}

/// A time of day without a time zone: nanoseconds since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub nanoseconds: i64,
}

impl LocalTime {
    pub fn from_naive(time: NaiveTime) -> Self {
        Self {
            nanoseconds: i64::from(time.num_seconds_from_midnight()) * 1_000_000_000
                + i64::from(time.nanosecond()),
        }
    }

    pub fn as_naive(&self) -> Option<NaiveTime> {
        let seconds = u32::try_from(self.nanoseconds.div_euclid(1_000_000_000)).ok()?;
        let nanos = u32::try_from(self.nanoseconds.rem_euclid(1_000_000_000)).ok()?;
        NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos)
    }
}

/// A time of day with a UTC offset: nanoseconds since midnight, offset in
/// seconds east of UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub nanoseconds: i64,
    pub tz_offset_seconds: i64,
}

/// A date and time without a time zone: seconds and leftover nanoseconds
/// since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDateTime {
    pub seconds: i64,
    pub nanoseconds: i64,
}

impl LocalDateTime {
    pub fn from_naive(date_time: NaiveDateTime) -> Self {
        Self {
            seconds: date_time.and_utc().timestamp(),
            nanoseconds: i64::from(date_time.and_utc().timestamp_subsec_nanos()),
        }
    }

    pub fn as_naive(&self) -> Option<NaiveDateTime> {
        let nanos = u32::try_from(self.nanoseconds).ok()?;
        ChronoDateTime::from_timestamp(self.seconds, nanos).map(|dt| dt.naive_utc())
    }
}

/// The time zone of a [`DateTime`]: either a fixed UTC offset in seconds or
/// an IANA time zone identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tz {
    Offset(i64),
    ZoneId(String),
}

/// A date and time in a specific time zone: seconds and leftover nanoseconds
/// since the Unix epoch (UTC) plus the zone the value was recorded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTime {
    pub seconds: i64,
    pub nanoseconds: i64,
    pub tz: Tz,
}

impl DateTime {
    pub fn from_fixed_offset(date_time: ChronoDateTime<FixedOffset>) -> Self {
        Self {
            seconds: date_time.timestamp(),
            nanoseconds: i64::from(date_time.timestamp_subsec_nanos()),
            tz: Tz::Offset(i64::from(date_time.offset().local_minus_utc())),
        }
    }

    /// The moment in time as a UTC [`chrono::DateTime`], dropping the zone.
    pub fn as_utc(&self) -> Option<ChronoDateTime<Utc>> {
        let nanos = u32::try_from(self.nanoseconds).ok()?;
        ChronoDateTime::from_timestamp(self.seconds, nanos)
    }

    /// The value in its own time zone, resolving zone ids through
    /// [`chrono_tz`]. Returns [`None`] for unknown zone ids or out-of-range
    /// values.
    pub fn as_zoned(&self) -> Option<ChronoDateTime<FixedOffset>> {
        let utc = self.as_utc()?;
        match &self.tz {
            Tz::Offset(seconds) => {
                let offset = FixedOffset::east_opt(i32::try_from(*seconds).ok()?)?;
                Some(utc.with_timezone(&offset))
            }
            Tz::ZoneId(id) => {
                let tz = chrono_tz::Tz::from_str(id).ok()?;
                let zoned = tz.from_utc_datetime(&utc.naive_utc());
                Some(zoned.with_timezone(&zoned.offset().fix()))
            }
        }
    }
}

/// A temporal amount: months, days, seconds, and nanoseconds are carried
/// separately because their lengths relate through calendar context only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanoseconds: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_round_trip() {
        let naive = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let date = Date::from_naive(naive);
        assert_eq!(date.as_naive(), Some(naive));
    }

    #[test]
    fn test_date_before_epoch() {
        let naive = NaiveDate::from_ymd_opt(1969, 12, 31).unwrap();
        let date = Date::from_naive(naive);
        assert_eq!(date.days, -1);
        assert_eq!(date.as_naive(), Some(naive));
    }

    #[test]
    fn test_local_time_round_trip() {
        let naive = NaiveTime::from_hms_nano_opt(23, 59, 59, 123_456_789).unwrap();
        let time = LocalTime::from_naive(naive);
        assert_eq!(time.as_naive(), Some(naive));
    }

    #[test]
    fn test_date_time_zone_id() {
        let date_time = DateTime {
            seconds: 1_700_000_000,
            nanoseconds: 0,
            tz: Tz::ZoneId(String::from("Europe/Stockholm")),
        };
        let zoned = date_time.as_zoned().unwrap();
        assert_eq!(zoned.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_date_time_unknown_zone_id() {
        let date_time = DateTime {
            seconds: 0,
            nanoseconds: 0,
            tz: Tz::ZoneId(String::from("Nowhere/Special")),
        };
        assert!(date_time.as_zoned().is_none());
    }
}
