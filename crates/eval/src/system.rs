//! System attributes computed once per session.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset, Weekday};

/// Config key holding weekly opening hours, e.g. `{"mon":"08:00-17:00"}`.
pub const OPERATING_HOURS_KEY: &str = "OperatingHours";
/// Config key holding the local UTC offset, e.g. `+10:00`.
pub const TIME_ZONE_KEY: &str = "TimeZone";
/// Config key holding extra holiday dates as a JSON array.
pub const HOLIDAYS_KEY: &str = "Holidays";

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock stopped at a fixed instant.
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.0
    }
}

/// Parse `Z`, `UTC`, `+HH:MM` or `-HH:MM`.
pub fn parse_offset(s: &str) -> Option<UtcOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Some(UtcOffset::UTC);
    }
    let (sign, rest) = match s.chars().next()? {
        '+' => (1i8, &s[1..]),
        '-' => (-1i8, &s[1..]),
        _ => return None,
    };
    let (h, m) = rest.split_once(':')?;
    let hours: i8 = h.parse().ok()?;
    let minutes: i8 = m.parse().ok()?;
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}

fn weekday_key(day: Weekday) -> &'static str {
    match day {
        Weekday::Monday => "mon",
        Weekday::Tuesday => "tue",
        Weekday::Wednesday => "wed",
        Weekday::Thursday => "thu",
        Weekday::Friday => "fri",
        Weekday::Saturday => "sat",
        Weekday::Sunday => "sun",
    }
}

fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h <= 24 && m < 60).then_some(h * 60 + m)
}

/// True when `minute_of_day` falls in any `HH:MM-HH:MM` range of `ranges`
/// (comma separated, end exclusive).
fn within_ranges(ranges: &str, minute_of_day: u32) -> bool {
    ranges.split(',').any(|range| {
        range
            .split_once('-')
            .and_then(|(start, end)| Some((parse_hhmm(start)?, parse_hhmm(end)?)))
            .is_some_and(|(start, end)| minute_of_day >= start && minute_of_day < end)
    })
}

fn time_of_day(hour: u8) -> &'static str {
    if hour < 12 {
        "morning"
    } else if hour < 17 {
        "afternoon"
    } else {
        "evening"
    }
}

fn format_offset(offset: UtcOffset) -> String {
    let sign = if offset.is_negative() { '-' } else { '+' };
    format!(
        "{}{:02}:{:02}",
        sign,
        offset.whole_hours().unsigned_abs(),
        offset.minutes_past_hour().unsigned_abs()
    )
}

fn rfc3339(dt: OffsetDateTime) -> String {
    dt.format(&Rfc3339).unwrap_or_else(|_| "unknown".to_string())
}

/// Build the `System` object.
///
/// Operating hours are closed on holidays and on days with no entry. The
/// time zone comes from the `TimeZone` config key, falling back to
/// `default_offset`.
pub fn compute_system(
    now: OffsetDateTime,
    dialed_number: Option<&str>,
    config: &BTreeMap<String, String>,
    holidays: &[String],
    default_offset: UtcOffset,
) -> Value {
    let offset = config
        .get(TIME_ZONE_KEY)
        .and_then(|tz| parse_offset(tz))
        .unwrap_or(default_offset);
    let local = now.to_offset(offset);
    let date = local.date();
    let date_key = format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    );

    let extra_holidays: Vec<String> = config
        .get(HOLIDAYS_KEY)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    let holiday = holidays
        .iter()
        .chain(extra_holidays.iter())
        .any(|h| h.trim() == date_key);

    let day = weekday_key(local.weekday());
    let minute_of_day = u32::from(local.hour()) * 60 + u32::from(local.minute());
    let hours: BTreeMap<String, String> = config
        .get(OPERATING_HOURS_KEY)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    let open = !holiday
        && hours
            .get(day)
            .is_some_and(|ranges| within_ranges(ranges, minute_of_day));

    json!({
        "DialedNumber": dialed_number.unwrap_or_default(),
        "DateTimeUTC": rfc3339(now),
        "DateTimeLocal": rfc3339(local),
        "TimeZone": format_offset(offset),
        "DayOfWeek": day,
        "TimeOfDay": time_of_day(local.hour()),
        "Holiday": holiday,
        "OperatingHours": if open { "open" } else { "closed" },
    })
}
