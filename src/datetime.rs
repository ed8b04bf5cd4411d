//! Date/time engine: `strftime`-style and numeric-epoch token parsing,
//! canonicalization, and time zone conversion.
//!
//! Zone-qualified conversions go through owned [`chrono_tz::Tz`] values, so
//! they are re-entrant; no process-global zone state is touched.

use std::fmt::{self, Write as _};

use chrono::{
    format::{parse, Parsed, StrftimeItems},
    Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone as _, Timelike, Utc,
};
use chrono_tz::Tz;
use derivative::Derivative;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Date/time format marker for epoch seconds.
pub(crate) const FMT_EPOCH_SECONDS: &str = "%s";
/// Date/time format marker for epoch microseconds.
pub(crate) const FMT_EPOCH_MICROSECONDS: &str = "%f";
/// Date/time format marker for epoch milliseconds.
pub(crate) const FMT_EPOCH_MILLISECONDS: &str = "%*";

/// Time zone the parsed dates and times are rendered in.
#[derive(Clone, Copy, Debug, Derivative, Eq, PartialEq)]
#[derivative(Default)]
pub enum TimeZone {
    /// Keep times in UTC (textual tokens are taken as-is).
    #[derivative(Default)]
    Utc,
    /// The system's local time zone.
    Local,
    /// A named IANA time zone.
    Named(Tz),
}

impl TimeZone {
    /// Parse a zone name. The empty string and `utc` map to [`TimeZone::Utc`],
    /// `local` to the system zone, anything else must be an IANA name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "utc" | "UTC" => Some(Self::Utc),
            "local" => Some(Self::Local),
            _ => s.parse::<Tz>().ok().map(Self::Named),
        }
    }

    /// Broken-down representation of `utc` in this zone.
    fn from_utc(&self, utc: chrono::DateTime<Utc>) -> NaiveDateTime {
        match self {
            Self::Utc => utc.naive_utc(),
            Self::Local => utc.with_timezone(&chrono::Local).naive_local(),
            Self::Named(tz) => utc.with_timezone(tz).naive_local(),
        }
    }
}

impl Serialize for TimeZone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Utc => serializer.serialize_str("utc"),
            Self::Local => serializer.serialize_str("local"),
            Self::Named(tz) => serializer.serialize_str(tz.name()),
        }
    }
}

impl<'de> Deserialize<'de> for TimeZone {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(TimeZoneVisitor)
    }
}

struct TimeZoneVisitor;

impl de::Visitor<'_> for TimeZoneVisitor {
    type Value = TimeZone;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a time zone name")
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Self::Value, E> {
        TimeZone::parse(s).ok_or_else(|| de::Error::custom("No such time zone"))
    }
}

/// Whether the format stands for a numeric epoch rather than a textual
/// pattern. Millisecond epochs are parsed too but do not count here; this
/// governs how the numeric date format is derived.
pub(crate) fn is_epoch_format(fmt: &str) -> bool {
    fmt == FMT_EPOCH_SECONDS || fmt == FMT_EPOCH_MICROSECONDS
}

fn epoch_divisor(fmt: &str) -> Option<u64> {
    match fmt {
        FMT_EPOCH_MICROSECONDS => Some(1_000_000),
        FMT_EPOCH_MILLISECONDS => Some(1_000),
        FMT_EPOCH_SECONDS => Some(1),
        _ => None,
    }
}

/// Parse `token` under `fmt`, filling fields the pattern does not produce
/// from `baseline`.
///
/// Numeric epochs (seconds, milliseconds or microseconds, selected by the
/// format marker) convert through the configured zone. Textual patterns must
/// consume the whole token; their fields are interpreted as UTC and then
/// rendered in the configured zone.
pub(crate) fn parse_datetime(
    token: &str,
    fmt: &str,
    tz: &TimeZone,
    baseline: NaiveDateTime,
) -> Option<NaiveDateTime> {
    if token.is_empty() || fmt.is_empty() {
        return None;
    }

    if let Some(divisor) = epoch_divisor(fmt) {
        let ts: u64 = token.parse().ok()?;
        let secs = i64::try_from(ts / divisor).ok()?;
        let utc = Utc.timestamp_opt(secs, 0).single()?;
        return Some(tz.from_utc(utc));
    }

    let mut parsed = Parsed::new();
    parse(&mut parsed, token, StrftimeItems::new(fmt)).ok()?;

    // A pattern carrying an embedded epoch (e.g. `%s` inside a larger
    // format) resolves directly to an instant.
    if let Some(ts) = parsed.timestamp() {
        let utc = Utc.timestamp_opt(ts, 0).single()?;
        return Some(tz.from_utc(utc));
    }

    let year = parsed
        .year()
        .or_else(|| parsed.year_mod_100().map(century_default))
        .unwrap_or_else(|| baseline.year());
    let month = parsed.month().unwrap_or_else(|| baseline.month());
    let day = parsed.day().unwrap_or_else(|| baseline.day());
    let hour = match (parsed.hour_div_12(), parsed.hour_mod_12()) {
        (Some(div), Some(modulo)) => div * 12 + modulo,
        _ => baseline.hour(),
    };
    let minute = parsed.minute().unwrap_or_else(|| baseline.minute());
    let second = parsed.second().unwrap_or_else(|| baseline.second()).min(59);

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    let naive = NaiveDateTime::new(date, time);

    if matches!(tz, TimeZone::Utc) {
        return Some(naive);
    }

    // The parsed fields are an instant in the token's own offset (UTC when
    // the pattern has none); render that instant in the configured zone.
    let offset = i64::from(parsed.offset().unwrap_or(0));
    let utc = Utc.from_utc_datetime(&naive) - chrono::Duration::seconds(offset);
    Some(tz.from_utc(utc))
}

fn century_default(year_mod_100: i32) -> i32 {
    if year_mod_100 < 70 {
        2000 + year_mod_100
    } else {
        1900 + year_mod_100
    }
}

/// Render the date portion under the derived numeric date format.
pub(crate) fn format_date(dt: &NaiveDateTime, num_format: &str) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", dt.format(num_format)).ok()?;
    Some(out)
}

/// Render the canonical `HH:MM:SS` time.
pub(crate) fn format_time(dt: &NaiveDateTime) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", dt.format("%H:%M:%S")).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn named(name: &str) -> TimeZone {
        TimeZone::parse(name).unwrap()
    }

    #[test]
    fn parses_apache_date() {
        let dt = parse_datetime("11/Jun/2023", "%d/%b/%Y", &TimeZone::Utc, baseline()).unwrap();
        assert_eq!(dt.date().to_string(), "2023-06-11");
    }

    #[test]
    fn parses_time_only_keeps_baseline_date() {
        let dt = parse_datetime("01:23:45", "%H:%M:%S", &TimeZone::Utc, baseline()).unwrap();
        assert_eq!(dt.to_string(), "2000-01-01 01:23:45");
    }

    #[test]
    fn rejects_trailing_input() {
        assert!(parse_datetime("11/Jun/2023 junk", "%d/%b/%Y", &TimeZone::Utc, baseline()).is_none());
    }

    #[test]
    fn rejects_empty_token() {
        assert!(parse_datetime("", "%d/%b/%Y", &TimeZone::Utc, baseline()).is_none());
    }

    #[test]
    fn epoch_seconds() {
        let dt = parse_datetime("1646861401", "%s", &TimeZone::Utc, baseline()).unwrap();
        assert_eq!(dt.to_string(), "2022-03-09 22:10:01");
    }

    #[test]
    fn epoch_milliseconds_and_microseconds() {
        let dt = parse_datetime("1646861401000", "%*", &TimeZone::Utc, baseline()).unwrap();
        assert_eq!(dt.to_string(), "2022-03-09 22:10:01");
        let dt = parse_datetime("1646861401000000", "%f", &TimeZone::Utc, baseline()).unwrap();
        assert_eq!(dt.to_string(), "2022-03-09 22:10:01");
    }

    #[test]
    fn epoch_rejects_non_numeric() {
        assert!(parse_datetime("16468x", "%s", &TimeZone::Utc, baseline()).is_none());
        assert!(parse_datetime("-5", "%s", &TimeZone::Utc, baseline()).is_none());
    }

    #[test]
    fn epoch_converts_through_named_zone() {
        let dt =
            parse_datetime("1646861401", "%s", &named("Asia/Taipei"), baseline()).unwrap();
        assert_eq!(dt.to_string(), "2022-03-10 06:10:01");
    }

    #[test]
    fn textual_converts_through_named_zone() {
        let dt = parse_datetime(
            "01:23:45",
            "%H:%M:%S",
            &named("Asia/Taipei"),
            baseline(),
        )
        .unwrap();
        assert_eq!(dt.time().to_string(), "09:23:45");
    }

    #[test]
    fn canonical_renderers() {
        let dt = NaiveDate::from_ymd_opt(2023, 6, 11)
            .unwrap()
            .and_hms_opt(1, 23, 45)
            .unwrap();
        assert_eq!(format_date(&dt, "%Y%m%d").as_deref(), Some("20230611"));
        assert_eq!(format_time(&dt).as_deref(), Some("01:23:45"));
    }

    #[test]
    fn zone_names() {
        assert_eq!(TimeZone::parse(""), Some(TimeZone::Utc));
        assert_eq!(TimeZone::parse("local"), Some(TimeZone::Local));
        assert!(matches!(
            TimeZone::parse("Europe/Berlin"),
            Some(TimeZone::Named(_))
        ));
        assert_eq!(TimeZone::parse("Mars/Olympus"), None);
    }
}
