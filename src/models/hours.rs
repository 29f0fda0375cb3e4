use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Regular opening hours for one weekday (0 = Monday .. 6 = Sunday).
/// Up to two disjoint ranges per day; both optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyHours {
    pub business_id: String,
    pub weekday: u8,
    pub is_open: bool,
    pub open1: Option<NaiveTime>,
    pub close1: Option<NaiveTime>,
    pub open2: Option<NaiveTime>,
    pub close2: Option<NaiveTime>,
}

impl WeeklyHours {
    pub fn closed(business_id: &str, weekday: u8) -> Self {
        Self {
            business_id: business_id.to_string(),
            weekday,
            is_open: false,
            open1: None,
            close1: None,
            open2: None,
            close2: None,
        }
    }

    /// The day's effective open windows. Malformed ranges render the whole
    /// day closed; callers never see an error for bad hour configuration.
    pub fn windows(&self) -> Vec<(NaiveTime, NaiveTime)> {
        if !self.is_open {
            return vec![];
        }
        windows_from(self.open1, self.close1, self.open2, self.close2)
    }
}

/// One-date override: a closed day, or replacement ranges for that date only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateException {
    pub business_id: String,
    pub date: NaiveDate,
    pub is_closed: bool,
    pub open1: Option<NaiveTime>,
    pub close1: Option<NaiveTime>,
    pub open2: Option<NaiveTime>,
    pub close2: Option<NaiveTime>,
}

impl DateException {
    pub fn windows(&self) -> Vec<(NaiveTime, NaiveTime)> {
        if self.is_closed {
            return vec![];
        }
        windows_from(self.open1, self.close1, self.open2, self.close2)
    }
}

fn windows_from(
    open1: Option<NaiveTime>,
    close1: Option<NaiveTime>,
    open2: Option<NaiveTime>,
    close2: Option<NaiveTime>,
) -> Vec<(NaiveTime, NaiveTime)> {
    let first = match (open1, close1) {
        (None, None) => None,
        (Some(s), Some(e)) if s < e => Some((s, e)),
        // half-specified or inverted range
        _ => return vec![],
    };
    let second = match (open2, close2) {
        (None, None) => None,
        (Some(s), Some(e)) if s < e => Some((s, e)),
        _ => return vec![],
    };

    match (first, second) {
        (Some(a), Some(b)) if a.1 <= b.0 => vec![a, b],
        // ranges out of order or overlapping: day effectively closed
        (Some(_), Some(_)) => vec![],
        (Some(a), None) => vec![a],
        (None, Some(b)) => vec![b],
        (None, None) => vec![],
    }
}
