use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;

use crate::db::queries;
use crate::models::{Appointment, BookingPolicy, Business, DayPart, Slot};

/// One availability search. `pivot_date` is business-local; the walk covers
/// up to `days_horizon` days or until `max_slots` candidates are accepted.
#[derive(Debug, Clone)]
pub struct SlotQuery {
    pub pivot_date: NaiveDate,
    pub duration_minutes: i64,
    pub days_horizon: i64,
    pub max_slots: usize,
    pub day_part: Option<DayPart>,
    /// Set while rescheduling so the appointment being moved does not block
    /// its own replacement times.
    pub exclude_appointment_id: Option<String>,
}

/// Why a specific customer-named time cannot be booked. The display text is
/// what the customer reads.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotRejection {
    Closed,
    OutsideHours { hours: String },
    TooSoon { notice_hours: i64 },
    Conflict,
    DayFull,
}

impl std::fmt::Display for SlotRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotRejection::Closed => {
                write!(f, "We aren't open that day. Could you pick another date?")
            }
            SlotRejection::OutsideHours { hours } => {
                write!(
                    f,
                    "That time is outside our opening hours ({hours}). Could you pick another time?"
                )
            }
            SlotRejection::TooSoon { notice_hours } => {
                write!(
                    f,
                    "We need at least {notice_hours} hours' notice. Could you pick a later time?"
                )
            }
            SlotRejection::Conflict => {
                write!(
                    f,
                    "Sorry, that time is already taken. Could you pick a different time?"
                )
            }
            SlotRejection::DayFull => {
                write!(f, "That day is fully booked. Could you try another day?")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum CandidateOutcome {
    Free {
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    },
    Rejected(SlotRejection),
}

/// Walks the open windows from `pivot_date` forward and returns bookable
/// slots in chronological order. An empty result is a valid answer, never an
/// error; misconfigured hours read as closed days.
pub fn find_slots(
    conn: &Connection,
    business: &Business,
    policy: &BookingPolicy,
    query: &SlotQuery,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<Slot>> {
    let mut slots: Vec<Slot> = vec![];
    if query.duration_minutes <= 0 || query.max_slots == 0 {
        return Ok(slots);
    }

    let tz = business.tz();
    let duration = Duration::minutes(query.duration_minutes);
    let step_min = policy.granularity_min.max(1);
    let buffer = Duration::minutes(policy.buffer_min.max(0));
    let earliest_allowed = now + Duration::hours(policy.min_notice_hours.max(0));
    let earliest_local = earliest_allowed.with_timezone(&tz).naive_local();
    let today_local = now.with_timezone(&tz).date_naive();

    let hours = queries::get_weekly_hours(conn, &business.id)?;

    // one store read covers the whole horizon; a day of margin on each side
    // absorbs any zone offset
    let horizon_start = query.pivot_date.and_time(NaiveTime::MIN).and_utc() - Duration::days(1);
    let horizon_end = horizon_start + Duration::days(query.days_horizon.max(0) + 2);
    let busy =
        queries::list_blocking_appointments(conn, &business.id, horizon_start, horizon_end)?;

    for offset in 0..query.days_horizon.max(0) {
        if slots.len() >= query.max_slots {
            break;
        }
        let date = query.pivot_date + Duration::days(offset);
        if date < today_local || policy.is_blackout(date) {
            continue;
        }
        if date == today_local && !policy.allow_same_day {
            continue;
        }

        let windows = match queries::get_exception(conn, &business.id, date)? {
            Some(exception) => exception.windows(),
            None => {
                let weekday = date.weekday().num_days_from_monday() as u8;
                hours
                    .iter()
                    .find(|h| h.weekday == weekday)
                    .map(|h| h.windows())
                    .unwrap_or_default()
            }
        };

        let mut day_remaining = policy.max_daily_appointments.map(|cap| {
            let existing = busy
                .iter()
                .filter(|a| not_excluded(a, query.exclude_appointment_id.as_deref()))
                .filter(|a| a.start_at.with_timezone(&tz).date_naive() == date)
                .count() as i64;
            (cap - existing).max(0)
        });

        'windows: for (win_start, win_end) in windows {
            if day_remaining == Some(0) {
                break;
            }
            let range_start = date.and_time(win_start);
            let range_end = date.and_time(win_end);

            // first grid step at or after the notice horizon; steps are
            // range_start + k * granularity
            let mut cursor = range_start;
            if earliest_local > cursor {
                let gap = (earliest_local - cursor).num_minutes();
                let k = (gap + step_min - 1) / step_min;
                cursor = range_start + Duration::minutes(k * step_min);
            }

            while cursor + duration <= range_end {
                let start_local = cursor;
                cursor += Duration::minutes(step_min);

                if let Some(day_part) = &query.day_part {
                    if !day_part.contains(start_local.time()) {
                        continue;
                    }
                }
                // a slot is rejected, never truncated, when its local clock
                // time does not exist in this zone (DST gap)
                let Some(start_at) = local_to_utc(&tz, start_local) else {
                    continue;
                };
                let Some(end_at) = local_to_utc(&tz, start_local + duration) else {
                    continue;
                };
                if start_at < earliest_allowed {
                    continue;
                }
                if conflicts(
                    &busy,
                    start_at,
                    end_at,
                    buffer,
                    query.exclude_appointment_id.as_deref(),
                ) {
                    continue;
                }

                if let Some(remaining) = &mut day_remaining {
                    *remaining -= 1;
                }
                slots.push(Slot::labeled(start_at, end_at, &tz));
                if slots.len() >= query.max_slots {
                    return Ok(slots);
                }
                if day_remaining == Some(0) {
                    break 'windows;
                }
            }
        }
    }

    Ok(slots)
}

/// Re-runs the full acceptance test for one customer-named local time.
/// Used when the customer asks for an exact time instead of picking from a
/// proposed list, and for reschedule targets (`exclude_appointment_id`).
pub fn validate_candidate(
    conn: &Connection,
    business: &Business,
    policy: &BookingPolicy,
    date: NaiveDate,
    time: NaiveTime,
    duration_minutes: i64,
    exclude_appointment_id: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<CandidateOutcome> {
    let tz = business.tz();
    let today_local = now.with_timezone(&tz).date_naive();
    let duration = Duration::minutes(duration_minutes.max(1));
    let buffer = Duration::minutes(policy.buffer_min.max(0));

    if policy.is_blackout(date) || (date == today_local && !policy.allow_same_day) {
        return Ok(CandidateOutcome::Rejected(SlotRejection::Closed));
    }

    let windows = match queries::get_exception(conn, &business.id, date)? {
        Some(exception) => exception.windows(),
        None => {
            let weekday = date.weekday().num_days_from_monday() as u8;
            queries::get_weekly_hours(conn, &business.id)?
                .iter()
                .find(|h| h.weekday == weekday)
                .map(|h| h.windows())
                .unwrap_or_default()
        }
    };
    if windows.is_empty() {
        return Ok(CandidateOutcome::Rejected(SlotRejection::Closed));
    }

    let start_local = date.and_time(time);
    let end_local = start_local + duration;
    let fits = windows
        .iter()
        .any(|(s, e)| date.and_time(*s) <= start_local && end_local <= date.and_time(*e));
    if !fits {
        return Ok(CandidateOutcome::Rejected(SlotRejection::OutsideHours {
            hours: hours_label(&windows),
        }));
    }

    let (Some(start_at), Some(end_at)) =
        (local_to_utc(&tz, start_local), local_to_utc(&tz, end_local))
    else {
        return Ok(CandidateOutcome::Rejected(SlotRejection::OutsideHours {
            hours: hours_label(&windows),
        }));
    };

    if start_at < now + Duration::hours(policy.min_notice_hours.max(0)) {
        return Ok(CandidateOutcome::Rejected(SlotRejection::TooSoon {
            notice_hours: policy.min_notice_hours,
        }));
    }

    // day-wide read: the cap counts every blocking appointment on that local
    // day, not just neighbours of the candidate
    let day_anchor = date.and_time(NaiveTime::MIN).and_utc();
    let busy = queries::list_blocking_appointments(
        conn,
        &business.id,
        day_anchor - Duration::days(1),
        day_anchor + Duration::days(2),
    )?;

    if let Some(cap) = policy.max_daily_appointments {
        let existing = busy
            .iter()
            .filter(|a| not_excluded(a, exclude_appointment_id))
            .filter(|a| a.start_at.with_timezone(&tz).date_naive() == date)
            .count() as i64;
        if existing >= cap {
            return Ok(CandidateOutcome::Rejected(SlotRejection::DayFull));
        }
    }

    if conflicts(&busy, start_at, end_at, buffer, exclude_appointment_id) {
        return Ok(CandidateOutcome::Rejected(SlotRejection::Conflict));
    }

    Ok(CandidateOutcome::Free { start_at, end_at })
}

/// Maps a business-local wall-clock time to the one absolute instant it
/// names. A time inside a DST gap has no instant; a time in a fold resolves
/// to the earlier one.
pub fn local_to_utc(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// The overlap rule shared by proposal and commit: a candidate collides with
/// any blocking appointment whose buffered interval it intersects.
pub fn conflicts(
    busy: &[Appointment],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    buffer: Duration,
    exclude: Option<&str>,
) -> bool {
    busy.iter().any(|a| {
        not_excluded(a, exclude) && a.start_at - buffer < end && a.end_at + buffer > start
    })
}

fn not_excluded(appt: &Appointment, exclude: Option<&str>) -> bool {
    exclude.map_or(true, |id| id != appt.id)
}

fn hours_label(windows: &[(NaiveTime, NaiveTime)]) -> String {
    windows
        .iter()
        .map(|(s, e)| format!("{}-{}", s.format("%H:%M"), e.format("%H:%M")))
        .collect::<Vec<_>>()
        .join(" and ")
}
