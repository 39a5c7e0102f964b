//! Access log timestamp normalization
//!
//! Converts `dd/Mon/yyyy:HH:mm:ss ±HHMM` into a UTC instant.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Map an English three-letter month abbreviation to 1..=12.
fn month_number(abbrev: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| *m == abbrev)
        .map(|i| i as u32 + 1)
}

/// Parse a `±HHMM` offset token.
fn parse_offset(token: &str) -> Option<FixedOffset> {
    let (sign, digits) = match token.as_bytes().first()? {
        b'+' => (1, &token[1..]),
        b'-' => (-1, &token[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn number<T: std::str::FromStr>(s: &str, width: usize) -> Option<T> {
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Normalize a raw log timestamp to UTC.
///
/// Returns `None` for anything that is not exactly `dd/Mon/yyyy:HH:mm:ss ±HHMM`
/// or that names an impossible date or time.
pub fn normalize(raw: &str) -> Option<DateTime<Utc>> {
    let (datetime, offset) = raw.rsplit_once(' ')?;
    let offset = parse_offset(offset)?;

    let (date, time) = datetime.split_once(':')?;
    let mut date_parts = date.split('/');
    let day: u32 = number(date_parts.next()?, 2)?;
    let month = month_number(date_parts.next()?)?;
    let year: i32 = number(date_parts.next()?, 4)?;
    if date_parts.next().is_some() {
        return None;
    }

    let mut time_parts = time.split(':');
    let hour: u32 = number(time_parts.next()?, 2)?;
    let minute: u32 = number(time_parts.next()?, 2)?;
    let second: u32 = number(time_parts.next()?, 2)?;
    if time_parts.next().is_some() {
        return None;
    }

    let naive = NaiveDate::from_ymd_opt(year, month, day)?
        .and_time(NaiveTime::from_hms_opt(hour, minute, second)?);

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
