use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use regex::Regex;

use crate::models::DayPart;

/// Everything the date/time resolver could read out of one utterance.
/// Absent fields simply stay `None`; this function never fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct When {
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub day_part: Option<DayPart>,
}

static BEFORE_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(before|after)\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b").expect("valid regex")
});
static TIME_12_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b").expect("valid regex")
});
static TIME_24_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2}):(\d{2})\b").expect("valid regex"));
static ABS_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{2,4}))?\b").expect("valid regex")
});
static WEEKDAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:next\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
        .expect("valid regex")
});
static TODAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btoday\b").expect("valid regex"));
static TOMORROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btomorrow\b").expect("valid regex"));
static MORNING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmorning\b").expect("valid regex"));
static AFTERNOON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bafternoon\b").expect("valid regex"));
static EVENING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(evening|tonight)\b").expect("valid regex"));

pub fn extract_when(text: &str, today: NaiveDate) -> When {
    let mut when = When::default();

    // "before 11am" / "after 15:00" are coarse filters, and their clock time
    // must not leak into the exact-time field below.
    let mut remaining = text.to_string();
    if let Some(caps) = BEFORE_AFTER_RE.captures(text) {
        if let Some(pivot) = clock_time(
            caps.get(2).map(|m| m.as_str()),
            caps.get(3).map(|m| m.as_str()),
            caps.get(4).map(|m| m.as_str()),
        ) {
            let kind = caps.get(1).map(|m| m.as_str().to_lowercase());
            when.day_part = match kind.as_deref() {
                Some("before") => Some(DayPart::Before(pivot)),
                _ => Some(DayPart::After(pivot)),
            };
            remaining = BEFORE_AFTER_RE.replace_all(text, " ").into_owned();
        }
    }

    if when.day_part.is_none() {
        if MORNING_RE.is_match(&remaining) {
            when.day_part = Some(DayPart::Morning);
        } else if AFTERNOON_RE.is_match(&remaining) {
            when.day_part = Some(DayPart::Afternoon);
        } else if EVENING_RE.is_match(&remaining) {
            when.day_part = Some(DayPart::Evening);
        }
    }

    when.time = extract_time(&remaining);
    when.date = extract_date(&remaining, today);

    when
}

fn extract_time(text: &str) -> Option<NaiveTime> {
    if let Some(caps) = TIME_12_RE.captures(text) {
        if let Some(t) = clock_time(
            caps.get(1).map(|m| m.as_str()),
            caps.get(2).map(|m| m.as_str()),
            caps.get(3).map(|m| m.as_str()),
        ) {
            return Some(t);
        }
    }
    if let Some(caps) = TIME_24_RE.captures(text) {
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }
    None
}

fn extract_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(caps) = ABS_DATE_RE.captures(text) {
        let day: u32 = caps.get(1)?.as_str().parse().ok()?;
        let month: u32 = caps.get(2)?.as_str().parse().ok()?;
        let year = caps.get(3).and_then(|m| m.as_str().parse::<i32>().ok());

        let year = match year {
            Some(y) if y < 100 => 2000 + y,
            Some(y) => y,
            None => today.year(),
        };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            // a year-less date already behind us means the next occurrence
            if caps.get(3).is_none() && date < today {
                return NaiveDate::from_ymd_opt(year + 1, month, day);
            }
            return Some(date);
        }
        return None;
    }

    if TODAY_RE.is_match(text) {
        return Some(today);
    }
    if TOMORROW_RE.is_match(text) {
        return Some(today + Duration::days(1));
    }

    if let Some(caps) = WEEKDAY_RE.captures(text) {
        let target = match caps.get(1)?.as_str().to_lowercase().as_str() {
            "monday" => Weekday::Mon,
            "tuesday" => Weekday::Tue,
            "wednesday" => Weekday::Wed,
            "thursday" => Weekday::Thu,
            "friday" => Weekday::Fri,
            "saturday" => Weekday::Sat,
            _ => Weekday::Sun,
        };
        let mut ahead = (target.num_days_from_monday() as i64
            - today.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
        if ahead == 0 {
            // a bare weekday name always means the next one, never today
            ahead = 7;
        }
        return Some(today + Duration::days(ahead));
    }

    None
}

fn clock_time(hour: Option<&str>, minute: Option<&str>, meridiem: Option<&str>) -> Option<NaiveTime> {
    let hour: u32 = hour?.parse().ok()?;
    let minute: u32 = minute.map(|m| m.parse().ok()).unwrap_or(Some(0))?;

    let hour = match meridiem.map(|m| m.to_lowercase()) {
        Some(m) if m == "pm" => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            (hour % 12) + 12
        }
        Some(m) if m == "am" => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            hour % 12
        }
        _ => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}
