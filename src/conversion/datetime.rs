//! `date`, `time`, `timestamp` and `timestamptz`.
//!
//! [`Value`](super::Value) keeps the server's integer form: days or
//! microseconds since 2000-01-01. The `time` crate does the calendar work
//! and the ISO text. Astronomical year 0 is shown as `0001 BC`, as the
//! server does.

use time::macros::{datetime, format_description};
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::error::{Error, Result};

/// Days from 1970-01-01 to 2000-01-01.
pub const PG_EPOCH_DAYS_FROM_UNIX: i32 = 10957;

/// Julian day of 2000-01-01.
const PG_EPOCH_JULIAN_DAY: i32 = 2_451_545;

const PG_EPOCH: OffsetDateTime = datetime!(2000-01-01 00:00:00 UTC);

const USECS_PER_DAY: i64 = 86_400_000_000;

/// The server rejects UTC offsets of 16 hours or more.
const MAX_OFFSET_HOURS: i8 = 15;

fn invalid(kind: &str, s: &str) -> Error {
    Error::Decode(format!("invalid {kind}: {s:?}"))
}

fn rejected(kind: &str, s: &str, e: impl std::fmt::Display) -> Error {
    Error::Decode(format!("invalid {kind} {s:?}: {e}"))
}

// === integer form <-> time ===

pub(crate) fn date_from_days(days: i32) -> Option<Date> {
    let julian = days.checked_add(PG_EPOCH_JULIAN_DAY)?;
    Date::from_julian_day(julian).ok()
}

pub(crate) fn days_from_date(date: Date) -> i32 {
    date.to_julian_day() - PG_EPOCH_JULIAN_DAY
}

/// `None` unless `0 <= usecs < 24h`; `24:00:00` has no [`Time`].
pub(crate) fn time_from_micros(usecs: i64) -> Option<Time> {
    (0..USECS_PER_DAY)
        .contains(&usecs)
        .then(|| Time::MIDNIGHT + Duration::microseconds(usecs))
}

pub(crate) fn micros_from_time(time: Time) -> i64 {
    let (hour, minute, second, micro) = time.as_hms_micro();
    i64::from(hour) * 3_600_000_000
        + i64::from(minute) * 60_000_000
        + i64::from(second) * 1_000_000
        + i64::from(micro)
}

pub(crate) fn datetime_from_micros(usecs: i64) -> Option<OffsetDateTime> {
    PG_EPOCH.checked_add(Duration::microseconds(usecs))
}

pub(crate) fn micros_from_datetime(datetime: OffsetDateTime) -> Option<i64> {
    i64::try_from((datetime - PG_EPOCH).whole_microseconds()).ok()
}

/// Days since 2000-01-01 for an astronomical year (year 0 is 1 BC).
pub fn date_from_ymd(year: i32, month: u32, day: u32) -> Option<i32> {
    let month = Month::try_from(u8::try_from(month).ok()?).ok()?;
    let date = Date::from_calendar_date(year, month, u8::try_from(day).ok()?).ok()?;
    Some(days_from_date(date))
}

/// Inverse of [`date_from_ymd`]. `None` outside the supported calendar.
pub fn ymd_from_date(days: i32) -> Option<(i32, u32, u32)> {
    let date = date_from_days(days)?;
    Some((date.year(), u32::from(u8::from(date.month())), u32::from(date.day())))
}

// === text output ===

fn push_ymd(out: &mut String, date: Date) -> bool {
    let year = date.year();
    let bc = year <= 0;
    let shown = if bc { 1 - year } else { year };
    out.push_str(&format!("{shown:04}-{:02}-{:02}", u8::from(date.month()), date.day()));
    bc
}

/// `HH:MM:SS` plus the fraction without trailing zeros.
fn push_clock(out: &mut String, time: Time) -> Result<()> {
    let text = if time.microsecond() == 0 {
        time.format(format_description!("[hour]:[minute]:[second]"))
    } else {
        time.format(format_description!("[hour]:[minute]:[second].[subsecond digits:6]"))
    }
    .map_err(|e| Error::BindParameter(format!("cannot format time: {e}")))?;
    if time.microsecond() == 0 {
        out.push_str(&text);
    } else {
        out.push_str(text.trim_end_matches('0'));
    }
    Ok(())
}

pub(crate) fn format_date(days: i32) -> Result<String> {
    match days {
        i32::MAX => Ok("infinity".into()),
        i32::MIN => Ok("-infinity".into()),
        _ => {
            let date = date_from_days(days).ok_or_else(|| Error::overflow("date", "the calendar"))?;
            let mut out = String::with_capacity(13);
            if push_ymd(&mut out, date) {
                out.push_str(" BC");
            }
            Ok(out)
        }
    }
}

pub(crate) fn format_time(usecs: i64) -> Result<String> {
    if usecs == USECS_PER_DAY {
        return Ok("24:00:00".into());
    }
    let time = time_from_micros(usecs).ok_or_else(|| Error::overflow("time", "one day"))?;
    let mut out = String::with_capacity(15);
    push_clock(&mut out, time)?;
    Ok(out)
}

pub(crate) fn format_timestamp(usecs: i64, with_tz: bool) -> Result<String> {
    match usecs {
        i64::MAX => Ok("infinity".into()),
        i64::MIN => Ok("-infinity".into()),
        _ => {
            let datetime = datetime_from_micros(usecs)
                .ok_or_else(|| Error::overflow("timestamp", "the calendar"))?;
            let mut out = String::with_capacity(32);
            let bc = push_ymd(&mut out, datetime.date());
            out.push(' ');
            push_clock(&mut out, datetime.time())?;
            if with_tz {
                out.push_str("+00");
            }
            if bc {
                out.push_str(" BC");
            }
            Ok(out)
        }
    }
}

// === text input ===

fn strip_bc(s: &str) -> (&str, bool) {
    match s.strip_suffix(" BC") {
        Some(rest) => (rest, true),
        None => (s, false),
    }
}

fn number<T: std::str::FromStr>(part: &str, kind: &str, whole: &str) -> Result<T> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(kind, whole));
    }
    part.parse().map_err(|_| invalid(kind, whole))
}

/// `YYYY-MM-DD`, where the year may run past four digits.
fn parse_calendar_date(s: &str, bc: bool, kind: &str, whole: &str) -> Result<Date> {
    let mut parts = s.splitn(3, '-');
    let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid(kind, whole));
    };
    let year: i32 = number(y, kind, whole)?;
    let month: u8 = number(m, kind, whole)?;
    let day: u8 = number(d, kind, whole)?;
    let year = if bc { 1 - year } else { year };
    let month = Month::try_from(month).map_err(|e| rejected(kind, whole, e))?;
    Date::from_calendar_date(year, month, day).map_err(|e| rejected(kind, whole, e))
}

/// `HH:MM:SS[.ffffff]`.
fn parse_clock(s: &str, whole: &str) -> Result<Time> {
    let parsed = if s.contains('.') {
        Time::parse(s, format_description!("[hour]:[minute]:[second].[subsecond]"))
    } else {
        Time::parse(s, format_description!("[hour]:[minute]:[second]"))
    };
    let time = parsed.map_err(|e| rejected("time", whole, e))?;
    if time.microsecond() * 1000 != time.nanosecond() {
        return Err(Error::Decode(format!(
            "fractional seconds beyond microseconds: {whole:?}"
        )));
    }
    Ok(time)
}

/// `+HH`, `+HHMM`, `+HH:MM` or `+HH:MM:SS`, at most 15 hours either way.
fn parse_offset(s: &str, whole: &str) -> Result<UtcOffset> {
    if s == "Z" {
        return Ok(UtcOffset::UTC);
    }
    let parsed = match s.len() {
        3 => UtcOffset::parse(s, format_description!("[offset_hour sign:mandatory]")),
        5 => UtcOffset::parse(
            s,
            format_description!("[offset_hour sign:mandatory][offset_minute]"),
        ),
        6 => UtcOffset::parse(
            s,
            format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
        ),
        9 => UtcOffset::parse(
            s,
            format_description!("[offset_hour sign:mandatory]:[offset_minute]:[offset_second]"),
        ),
        _ => return Err(invalid("timestamptz offset", whole)),
    };
    let offset = parsed.map_err(|e| rejected("timestamptz offset", whole, e))?;
    if !(-MAX_OFFSET_HOURS..=MAX_OFFSET_HOURS).contains(&offset.whole_hours()) {
        return Err(invalid("timestamptz offset", whole));
    }
    Ok(offset)
}

pub(crate) fn parse_date(s: &str) -> Result<i32> {
    match s {
        "infinity" => return Ok(i32::MAX),
        "-infinity" => return Ok(i32::MIN),
        _ => {}
    }
    let (body, bc) = strip_bc(s);
    parse_calendar_date(body, bc, "date", s).map(days_from_date)
}

/// `HH:MM:SS[.ffffff]`, up to `24:00:00`.
pub(crate) fn parse_time(s: &str) -> Result<i64> {
    if s == "24:00:00" {
        return Ok(USECS_PER_DAY);
    }
    parse_clock(s, s).map(micros_from_time)
}

/// Parse the server's ISO output. With `with_tz` the result is UTC.
pub(crate) fn parse_timestamp(s: &str, with_tz: bool) -> Result<i64> {
    match s {
        "infinity" => return Ok(i64::MAX),
        "-infinity" => return Ok(i64::MIN),
        _ => {}
    }
    let kind = if with_tz { "timestamptz" } else { "timestamp" };
    let (body, bc) = strip_bc(s);
    let (date, rest) = body.split_once([' ', 'T']).unwrap_or((body, ""));
    let date = parse_calendar_date(date, bc, kind, s)?;

    let (clock, offset) = match rest.find(['+', '-', 'Z']) {
        Some(at) => rest.split_at_checked(at).unwrap_or((rest, "")),
        None => (rest, ""),
    };
    let time = if clock.is_empty() {
        Time::MIDNIGHT
    } else {
        parse_clock(clock, s)?
    };
    let local = PrimitiveDateTime::new(date, time);
    let instant = match offset {
        "" => local.assume_utc(),
        offset => {
            let offset = parse_offset(offset, s)?;
            if with_tz {
                local.assume_offset(offset)
            } else {
                local.assume_utc()
            }
        }
    };
    micros_from_datetime(instant).ok_or_else(|| Error::decode_overflow(kind, "i64 microseconds"))
}

/// `time` crate conversions, binary only on the way out.
mod typed {
    use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

    use crate::conversion::{FromWireValue, ToWireValue, utf8, write_prefixed};
    use crate::error::{Error, Result};
    use crate::protocol::types::{FormatCode, Oid, oid};

    fn wrong_oid(oid: Oid, rust_type: &str) -> Error {
        Error::Decode(format!("cannot decode oid {oid} as {rust_type}"))
    }

    fn be_i32(bytes: &[u8], what: &str) -> Result<i32> {
        <[u8; 4]>::try_from(bytes)
            .map(i32::from_be_bytes)
            .map_err(|_| Error::Decode(format!("invalid {what} length: {}", bytes.len())))
    }

    fn be_i64(bytes: &[u8], what: &str) -> Result<i64> {
        <[u8; 8]>::try_from(bytes)
            .map(i64::from_be_bytes)
            .map_err(|_| Error::Decode(format!("invalid {what} length: {}", bytes.len())))
    }

    fn date_of(days: i32) -> Result<Date> {
        super::date_from_days(days).ok_or_else(|| Error::decode_overflow("date", "time::Date"))
    }

    /// `i64::MAX` and `i64::MIN` are the server's infinities.
    fn datetime_of(usecs: i64) -> Result<OffsetDateTime> {
        if usecs == i64::MAX || usecs == i64::MIN {
            return Err(Error::Decode("infinite timestamp has no time::OffsetDateTime".into()));
        }
        super::datetime_from_micros(usecs)
            .ok_or_else(|| Error::decode_overflow("timestamp", "time::OffsetDateTime"))
    }

    fn write_micros(buf: &mut Vec<u8>, datetime: OffsetDateTime) -> Result<FormatCode> {
        let usecs = super::micros_from_datetime(datetime)
            .ok_or_else(|| Error::overflow("time::OffsetDateTime", "timestamp"))?;
        write_prefixed(buf, |b| {
            b.extend_from_slice(&usecs.to_be_bytes());
            Ok(())
        })?;
        Ok(FormatCode::Binary)
    }

    impl FromWireValue<'_> for Date {
        fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
            if oid != oid::DATE {
                return Err(wrong_oid(oid, "Date"));
            }
            date_of(super::parse_date(utf8(bytes)?)?)
        }

        fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
            if oid != oid::DATE {
                return Err(wrong_oid(oid, "Date"));
            }
            date_of(be_i32(bytes, "date")?)
        }
    }

    impl ToWireValue for Date {
        fn natural_oid(&self) -> Oid {
            oid::DATE
        }

        fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
            match target_oid {
                oid::DATE => {
                    let days = super::days_from_date(*self);
                    write_prefixed(buf, |b| {
                        b.extend_from_slice(&days.to_be_bytes());
                        Ok(())
                    })?;
                    Ok(FormatCode::Binary)
                }
                _ => Err(Error::unsupported(target_oid, "time::Date")),
            }
        }
    }

    impl FromWireValue<'_> for Time {
        fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
            if oid != oid::TIME {
                return Err(wrong_oid(oid, "Time"));
            }
            let usecs = super::parse_time(utf8(bytes)?)?;
            super::time_from_micros(usecs).ok_or_else(|| Error::decode_overflow("time", "time::Time"))
        }

        fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
            if oid != oid::TIME {
                return Err(wrong_oid(oid, "Time"));
            }
            super::time_from_micros(be_i64(bytes, "time")?)
                .ok_or_else(|| Error::decode_overflow("time", "time::Time"))
        }
    }

    impl ToWireValue for Time {
        fn natural_oid(&self) -> Oid {
            oid::TIME
        }

        fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
            match target_oid {
                oid::TIME => {
                    let usecs = super::micros_from_time(*self);
                    write_prefixed(buf, |b| {
                        b.extend_from_slice(&usecs.to_be_bytes());
                        Ok(())
                    })?;
                    Ok(FormatCode::Binary)
                }
                _ => Err(Error::unsupported(target_oid, "time::Time")),
            }
        }
    }

    /// Read as UTC wall-clock time when the column is `timestamptz`.
    impl FromWireValue<'_> for PrimitiveDateTime {
        fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
            if !matches!(oid, oid::TIMESTAMP | oid::TIMESTAMPTZ) {
                return Err(wrong_oid(oid, "PrimitiveDateTime"));
            }
            let usecs = super::parse_timestamp(utf8(bytes)?, oid == oid::TIMESTAMPTZ)?;
            let datetime = datetime_of(usecs)?;
            Ok(PrimitiveDateTime::new(datetime.date(), datetime.time()))
        }

        fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
            if !matches!(oid, oid::TIMESTAMP | oid::TIMESTAMPTZ) {
                return Err(wrong_oid(oid, "PrimitiveDateTime"));
            }
            let datetime = datetime_of(be_i64(bytes, "timestamp")?)?;
            Ok(PrimitiveDateTime::new(datetime.date(), datetime.time()))
        }
    }

    impl ToWireValue for PrimitiveDateTime {
        fn natural_oid(&self) -> Oid {
            oid::TIMESTAMP
        }

        fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
            match target_oid {
                oid::TIMESTAMP | oid::TIMESTAMPTZ => write_micros(buf, self.assume_utc()),
                _ => Err(Error::unsupported(target_oid, "time::PrimitiveDateTime")),
            }
        }
    }

    impl FromWireValue<'_> for OffsetDateTime {
        fn from_text(oid: Oid, bytes: &[u8]) -> Result<Self> {
            if oid != oid::TIMESTAMPTZ {
                return Err(wrong_oid(oid, "OffsetDateTime"));
            }
            datetime_of(super::parse_timestamp(utf8(bytes)?, true)?)
        }

        fn from_binary(oid: Oid, bytes: &[u8]) -> Result<Self> {
            if oid != oid::TIMESTAMPTZ {
                return Err(wrong_oid(oid, "OffsetDateTime"));
            }
            datetime_of(be_i64(bytes, "timestamptz")?)
        }
    }

    impl ToWireValue for OffsetDateTime {
        fn natural_oid(&self) -> Oid {
            oid::TIMESTAMPTZ
        }

        fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<FormatCode> {
            match target_oid {
                oid::TIMESTAMP | oid::TIMESTAMPTZ => write_micros(buf, self.to_offset(UtcOffset::UTC)),
                _ => Err(Error::unsupported(target_oid, "time::OffsetDateTime")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{FromWireValue, ToWireValue};
    use crate::protocol::types::oid;

    const USECS_PER_HOUR: i64 = 3_600_000_000;
    const USECS_PER_MINUTE: i64 = 60_000_000;

    #[test]
    fn test_civil_days() {
        assert_eq!(date_from_ymd(2000, 1, 1), Some(0));
        assert_eq!(date_from_ymd(1970, 1, 1), Some(-PG_EPOCH_DAYS_FROM_UNIX));
        assert_eq!(date_from_ymd(2024, 2, 29), Some(8825));
        assert_eq!(date_from_ymd(2023, 2, 29), None);
        assert_eq!(date_from_ymd(2024, 13, 1), None);
        assert_eq!(ymd_from_date(8825), Some((2024, 2, 29)));
        assert_eq!(ymd_from_date(-1), Some((1999, 12, 31)));
        assert_eq!(ymd_from_date(i32::MAX), None);
    }

    #[test]
    fn test_date_text() {
        assert_eq!(format_date(0).unwrap(), "2000-01-01");
        assert_eq!(parse_date("2000-01-01").unwrap(), 0);
        assert_eq!(parse_date("1999-12-31").unwrap(), -1);
        let bc = parse_date("0044-03-15 BC").unwrap();
        assert_eq!(format_date(bc).unwrap(), "0044-03-15 BC");
        assert_eq!(parse_date("infinity").unwrap(), i32::MAX);
        assert_eq!(format_date(i32::MIN).unwrap(), "-infinity");
        assert!(parse_date("2000-13-01").is_err());
        assert!(parse_date("2023-02-29").is_err());
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_time_text() {
        assert_eq!(parse_time("00:00:00").unwrap(), 0);
        assert_eq!(parse_time("12:34:56.5").unwrap(), 45_296_500_000);
        assert_eq!(format_time(45_296_500_000).unwrap(), "12:34:56.5");
        assert_eq!(format_time(1).unwrap(), "00:00:00.000001");
        assert_eq!(format_time(0).unwrap(), "00:00:00");
        assert_eq!(parse_time("24:00:00").unwrap(), USECS_PER_DAY);
        assert_eq!(format_time(USECS_PER_DAY).unwrap(), "24:00:00");
        assert!(parse_time("12:00:00.1234567").is_err());
        assert!(parse_time("12:61:00").is_err());
        assert!(matches!(format_time(-1), Err(Error::BindParameter(_))));
    }

    #[test]
    fn test_timestamp_text() {
        assert_eq!(parse_timestamp("2000-01-01 00:00:00", false).unwrap(), 0);
        assert_eq!(
            format_timestamp(USECS_PER_DAY + 1_500_000, false).unwrap(),
            "2000-01-02 00:00:01.5"
        );
        assert_eq!(format_timestamp(0, true).unwrap(), "2000-01-01 00:00:00+00");
        assert_eq!(parse_timestamp("2000-01-01 02:00:00+02", true).unwrap(), 0);
        assert_eq!(
            parse_timestamp("2000-01-01 00:00:00-05:30", true).unwrap(),
            5 * USECS_PER_HOUR + 30 * USECS_PER_MINUTE
        );
        assert_eq!(
            parse_timestamp("2000-01-01 00:00:00+0130", true).unwrap(),
            -(USECS_PER_HOUR + 30 * USECS_PER_MINUTE)
        );
        assert_eq!(parse_timestamp("1999-12-31 23:59:59.999999+00:00:01", true).unwrap(), -1_000_001);
        assert_eq!(parse_timestamp("-infinity", true).unwrap(), i64::MIN);
        assert_eq!(format_timestamp(i64::MAX, false).unwrap(), "infinity");
        let ts = parse_timestamp("0001-01-01 00:00:00+00 BC", true).unwrap();
        assert_eq!(format_timestamp(ts, true).unwrap(), "0001-01-01 00:00:00+00 BC");
    }

    #[test]
    fn test_timestamp_offset_out_of_range() {
        for text in [
            "2000-01-01 00:00:00+2562047788015:00",
            "2000-01-01 00:00:00+16",
            "2000-01-01 00:00:00-16:00",
            "2000-01-01 00:00:00+05:60",
            "2000-01-01 00:00:00+05:30:60",
            "2000-01-01 00:00:00+5",
        ] {
            let err = parse_timestamp(text, true).unwrap_err();
            assert!(matches!(err, Error::Decode(_)), "{text}: {err}");
        }
        assert!(parse_timestamp("2000-01-01 00:00:00+15:59:59", true).is_ok());
    }

    #[test]
    fn test_timestamp_year_beyond_i64() {
        let err = parse_timestamp("900000-01-01 00:00:00", false).unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "{err}");
    }

    #[test]
    fn test_time_crate_types() {
        let date = Date::from_calendar_date(2024, Month::January, 15).unwrap();
        assert_eq!(Date::from_binary(oid::DATE, &8780_i32.to_be_bytes()).unwrap(), date);
        assert_eq!(Date::from_text(oid::DATE, b"2024-01-15").unwrap(), date);
        let mut buf = Vec::new();
        date.encode(date.natural_oid(), &mut buf).unwrap();
        assert_eq!(&buf[4..], &8780_i32.to_be_bytes());
        assert!(Date::from_text(oid::DATE, b"infinity").is_err());

        let time = Time::from_hms_micro(10, 30, 45, 123_456).unwrap();
        assert_eq!(Time::from_text(oid::TIME, b"10:30:45.123456").unwrap(), time);
        buf.clear();
        time.encode(oid::TIME, &mut buf).unwrap();
        assert_eq!(Time::from_binary(oid::TIME, &buf[4..]).unwrap(), time);

        let local = PrimitiveDateTime::new(date, time);
        buf.clear();
        local.encode(oid::TIMESTAMP, &mut buf).unwrap();
        assert_eq!(PrimitiveDateTime::from_binary(oid::TIMESTAMP, &buf[4..]).unwrap(), local);

        let zoned = OffsetDateTime::from_text(oid::TIMESTAMPTZ, b"2024-01-15 12:30:45.123456+02").unwrap();
        assert_eq!(zoned, local.assume_utc());
        buf.clear();
        zoned.encode(oid::TIMESTAMPTZ, &mut buf).unwrap();
        assert_eq!(OffsetDateTime::from_binary(oid::TIMESTAMPTZ, &buf[4..]).unwrap(), zoned);

        assert!(matches!(
            date.encode(oid::TIMESTAMP, &mut buf),
            Err(Error::UnsupportedType { .. })
        ));
        assert!(OffsetDateTime::from_binary(oid::TIMESTAMPTZ, &i64::MAX.to_be_bytes()).is_err());
    }
}
