use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{
    Appointment, AppointmentStatus, BookingPolicy, Business, ConversationDraft, DateException,
    ServiceItem, WeeklyHours,
};

const DT_FMT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M";

fn fmt_dt(dt: &DateTime<Utc>) -> String {
    dt.format(DT_FMT).to_string()
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, DT_FMT)
        .map(|n| n.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

fn fmt_time(t: Option<NaiveTime>) -> Option<String> {
    t.map(|t| t.format(TIME_FMT).to_string())
}

fn parse_time(s: Option<String>) -> Option<NaiveTime> {
    s.and_then(|s| NaiveTime::parse_from_str(&s, TIME_FMT).ok())
}

// ── Businesses ──

pub fn get_business(conn: &Connection, id: &str) -> anyhow::Result<Option<Business>> {
    let result = conn.query_row(
        "SELECT id, name, timezone, owner_phone FROM businesses WHERE id = ?1",
        params![id],
        |row| {
            Ok(Business {
                id: row.get(0)?,
                name: row.get(1)?,
                timezone: row.get(2)?,
                owner_phone: row.get(3)?,
            })
        },
    );

    match result {
        Ok(business) => Ok(Some(business)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_business(conn: &Connection, business: &Business) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO businesses (id, name, timezone, owner_phone)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           timezone = excluded.timezone,
           owner_phone = excluded.owner_phone",
        params![
            business.id,
            business.name,
            business.timezone,
            business.owner_phone
        ],
    )?;
    Ok(())
}

// ── Services ──

pub fn list_services(conn: &Connection, business_id: &str) -> anyhow::Result<Vec<ServiceItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, business_id, name, aliases, duration_minutes, deposit_required, active
         FROM services WHERE business_id = ?1 AND active = 1 ORDER BY name ASC",
    )?;

    let rows = stmt.query_map(params![business_id], |row| {
        let aliases_json: String = row.get(3)?;
        Ok(ServiceItem {
            id: row.get(0)?,
            business_id: row.get(1)?,
            name: row.get(2)?,
            aliases: serde_json::from_str(&aliases_json).unwrap_or_default(),
            duration_minutes: row.get(4)?,
            deposit_required: row.get::<_, i64>(5)? != 0,
            active: row.get::<_, i64>(6)? != 0,
        })
    })?;

    let mut services = vec![];
    for row in rows {
        services.push(row?);
    }
    Ok(services)
}

pub fn save_service(conn: &Connection, service: &ServiceItem) -> anyhow::Result<()> {
    let aliases_json = serde_json::to_string(&service.aliases)?;
    conn.execute(
        "INSERT INTO services (id, business_id, name, aliases, duration_minutes, deposit_required, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           aliases = excluded.aliases,
           duration_minutes = excluded.duration_minutes,
           deposit_required = excluded.deposit_required,
           active = excluded.active",
        params![
            service.id,
            service.business_id,
            service.name,
            aliases_json,
            service.duration_minutes,
            service.deposit_required as i64,
            service.active as i64,
        ],
    )?;
    Ok(())
}

// ── Weekly hours ──

/// Returns all 7 weekday rows, seeding any missing ones as closed so the
/// calculator can always rely on a complete week.
pub fn get_weekly_hours(conn: &Connection, business_id: &str) -> anyhow::Result<Vec<WeeklyHours>> {
    let mut stmt = conn.prepare(
        "SELECT business_id, weekday, is_open, open1, close1, open2, close2
         FROM weekly_hours WHERE business_id = ?1 ORDER BY weekday ASC",
    )?;

    let rows = stmt.query_map(params![business_id], |row| {
        Ok(WeeklyHours {
            business_id: row.get(0)?,
            weekday: row.get::<_, i64>(1)? as u8,
            is_open: row.get::<_, i64>(2)? != 0,
            open1: parse_time(row.get(3)?),
            close1: parse_time(row.get(4)?),
            open2: parse_time(row.get(5)?),
            close2: parse_time(row.get(6)?),
        })
    })?;

    let mut hours: Vec<WeeklyHours> = vec![];
    for row in rows {
        hours.push(row?);
    }

    for weekday in 0u8..7 {
        if !hours.iter().any(|h| h.weekday == weekday) {
            let seeded = WeeklyHours::closed(business_id, weekday);
            save_weekly_hours(conn, &seeded)?;
            hours.push(seeded);
        }
    }
    hours.sort_by_key(|h| h.weekday);

    Ok(hours)
}

pub fn save_weekly_hours(conn: &Connection, hours: &WeeklyHours) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO weekly_hours (business_id, weekday, is_open, open1, close1, open2, close2)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(business_id, weekday) DO UPDATE SET
           is_open = excluded.is_open,
           open1 = excluded.open1,
           close1 = excluded.close1,
           open2 = excluded.open2,
           close2 = excluded.close2",
        params![
            hours.business_id,
            hours.weekday as i64,
            hours.is_open as i64,
            fmt_time(hours.open1),
            fmt_time(hours.close1),
            fmt_time(hours.open2),
            fmt_time(hours.close2),
        ],
    )?;
    Ok(())
}

// ── Date exceptions ──

pub fn get_exception(
    conn: &Connection,
    business_id: &str,
    date: NaiveDate,
) -> anyhow::Result<Option<DateException>> {
    let result = conn.query_row(
        "SELECT business_id, date, is_closed, open1, close1, open2, close2
         FROM date_exceptions WHERE business_id = ?1 AND date = ?2",
        params![business_id, date.format(DATE_FMT).to_string()],
        |row| {
            let date_str: String = row.get(1)?;
            Ok(DateException {
                business_id: row.get(0)?,
                date: NaiveDate::parse_from_str(&date_str, DATE_FMT).unwrap_or(date),
                is_closed: row.get::<_, i64>(2)? != 0,
                open1: parse_time(row.get(3)?),
                close1: parse_time(row.get(4)?),
                open2: parse_time(row.get(5)?),
                close2: parse_time(row.get(6)?),
            })
        },
    );

    match result {
        Ok(exception) => Ok(Some(exception)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_exception(conn: &Connection, exception: &DateException) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO date_exceptions (business_id, date, is_closed, open1, close1, open2, close2)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(business_id, date) DO UPDATE SET
           is_closed = excluded.is_closed,
           open1 = excluded.open1,
           close1 = excluded.close1,
           open2 = excluded.open2,
           close2 = excluded.close2",
        params![
            exception.business_id,
            exception.date.format(DATE_FMT).to_string(),
            exception.is_closed as i64,
            fmt_time(exception.open1),
            fmt_time(exception.close1),
            fmt_time(exception.open2),
            fmt_time(exception.close2),
        ],
    )?;
    Ok(())
}

// ── Booking policies ──

pub fn get_policy(conn: &Connection, business_id: &str) -> anyhow::Result<BookingPolicy> {
    let result = conn.query_row(
        "SELECT business_id, buffer_min, granularity_min, min_notice_hours, max_daily_appointments,
                booking_window_days, blackout_dates, allow_same_day, require_confirmation
         FROM booking_policies WHERE business_id = ?1",
        params![business_id],
        |row| {
            let blackouts_json: String = row.get(6)?;
            let blackout_strs: Vec<String> =
                serde_json::from_str(&blackouts_json).unwrap_or_default();
            Ok(BookingPolicy {
                business_id: row.get(0)?,
                buffer_min: row.get(1)?,
                granularity_min: row.get(2)?,
                min_notice_hours: row.get(3)?,
                max_daily_appointments: row.get(4)?,
                booking_window_days: row.get(5)?,
                blackout_dates: blackout_strs
                    .iter()
                    .filter_map(|s| NaiveDate::parse_from_str(s, DATE_FMT).ok())
                    .collect(),
                allow_same_day: row.get::<_, i64>(7)? != 0,
                require_confirmation: row.get::<_, i64>(8)? != 0,
            })
        },
    );

    match result {
        Ok(policy) => Ok(policy),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(BookingPolicy::defaults(business_id)),
        Err(e) => Err(e.into()),
    }
}

pub fn save_policy(conn: &Connection, policy: &BookingPolicy) -> anyhow::Result<()> {
    let blackout_strs: Vec<String> = policy
        .blackout_dates
        .iter()
        .map(|d| d.format(DATE_FMT).to_string())
        .collect();
    let blackouts_json = serde_json::to_string(&blackout_strs)?;

    conn.execute(
        "INSERT INTO booking_policies (business_id, buffer_min, granularity_min, min_notice_hours,
                                       max_daily_appointments, booking_window_days, blackout_dates,
                                       allow_same_day, require_confirmation)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(business_id) DO UPDATE SET
           buffer_min = excluded.buffer_min,
           granularity_min = excluded.granularity_min,
           min_notice_hours = excluded.min_notice_hours,
           max_daily_appointments = excluded.max_daily_appointments,
           booking_window_days = excluded.booking_window_days,
           blackout_dates = excluded.blackout_dates,
           allow_same_day = excluded.allow_same_day,
           require_confirmation = excluded.require_confirmation",
        params![
            policy.business_id,
            policy.buffer_min,
            policy.granularity_min,
            policy.min_notice_hours,
            policy.max_daily_appointments,
            policy.booking_window_days,
            blackouts_json,
            policy.allow_same_day as i64,
            policy.require_confirmation as i64,
        ],
    )?;
    Ok(())
}

// ── Appointments ──

const APPOINTMENT_COLS: &str = "id, business_id, service_id, conversation_id, customer_name, \
     customer_phone, start_at, end_at, timezone, status, cancelled_at, created_at, updated_at";

pub fn insert_appointment(conn: &Connection, appt: &Appointment) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO appointments (id, business_id, service_id, conversation_id, customer_name,
                                   customer_phone, start_at, end_at, timezone, status, cancelled_at,
                                   created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            appt.id,
            appt.business_id,
            appt.service_id,
            appt.conversation_id,
            appt.customer_name,
            appt.customer_phone,
            fmt_dt(&appt.start_at),
            fmt_dt(&appt.end_at),
            appt.timezone,
            appt.status.as_str(),
            appt.cancelled_at.as_ref().map(fmt_dt),
            fmt_dt(&appt.created_at),
            fmt_dt(&appt.updated_at),
        ],
    )?;
    Ok(())
}

/// Appointments that occupy calendar time and intersect the given range.
pub fn list_blocking_appointments(
    conn: &Connection,
    business_id: &str,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> anyhow::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLS} FROM appointments
         WHERE business_id = ?1
           AND status IN ('pending', 'confirmed', 'rescheduled')
           AND start_at < ?2 AND end_at > ?3
         ORDER BY start_at ASC"
    ))?;

    let rows = stmt.query_map(
        params![business_id, fmt_dt(&range_end), fmt_dt(&range_start)],
        |row| Ok(parse_appointment_row(row)),
    )?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

pub fn get_appointment(conn: &Connection, id: &str) -> anyhow::Result<Option<Appointment>> {
    let result = conn.query_row(
        &format!("SELECT {APPOINTMENT_COLS} FROM appointments WHERE id = ?1"),
        params![id],
        |row| Ok(parse_appointment_row(row)),
    );

    match result {
        Ok(appt) => Ok(Some(appt?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Next upcoming blocking appointment booked under the given phone number.
pub fn find_upcoming_appointment_by_phone(
    conn: &Connection,
    business_id: &str,
    phone: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<Appointment>> {
    let result = conn.query_row(
        &format!(
            "SELECT {APPOINTMENT_COLS} FROM appointments
             WHERE business_id = ?1 AND customer_phone = ?2
               AND status IN ('pending', 'confirmed', 'rescheduled')
               AND start_at > ?3
             ORDER BY start_at ASC LIMIT 1"
        ),
        params![business_id, phone, fmt_dt(&now)],
        |row| Ok(parse_appointment_row(row)),
    );

    match result {
        Ok(appt) => Ok(Some(appt?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn update_appointment_status(
    conn: &Connection,
    id: &str,
    status: &AppointmentStatus,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let cancelled_at = match status {
        AppointmentStatus::Cancelled => Some(fmt_dt(&now)),
        _ => None,
    };
    let count = conn.execute(
        "UPDATE appointments
         SET status = ?1, cancelled_at = COALESCE(?2, cancelled_at), updated_at = ?3
         WHERE id = ?4",
        params![status.as_str(), cancelled_at, fmt_dt(&now), id],
    )?;
    Ok(count > 0)
}

/// Moves an appointment in place: same identity, new interval, status
/// `rescheduled`.
pub fn update_appointment_time(
    conn: &Connection,
    id: &str,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments
         SET start_at = ?1, end_at = ?2, status = 'rescheduled', updated_at = ?3
         WHERE id = ?4",
        params![fmt_dt(&start_at), fmt_dt(&end_at), fmt_dt(&now), id],
    )?;
    Ok(count > 0)
}

fn parse_appointment_row(row: &rusqlite::Row) -> anyhow::Result<Appointment> {
    let start_at: String = row.get(6)?;
    let end_at: String = row.get(7)?;
    let status_str: String = row.get(9)?;
    let cancelled_at: Option<String> = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok(Appointment {
        id: row.get(0)?,
        business_id: row.get(1)?,
        service_id: row.get(2)?,
        conversation_id: row.get(3)?,
        customer_name: row.get(4)?,
        customer_phone: row.get(5)?,
        start_at: parse_dt(&start_at),
        end_at: parse_dt(&end_at),
        timezone: row.get(8)?,
        status: AppointmentStatus::parse(&status_str),
        cancelled_at: cancelled_at.map(|s| parse_dt(&s)),
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

// ── Conversation drafts ──

/// Loads the draft for a conversation, applying lazy expiry: a row whose
/// expiry has passed is invisible, so the caller starts a fresh idle draft.
pub fn get_draft(
    conn: &Connection,
    conversation_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<ConversationDraft>> {
    let result = conn.query_row(
        "SELECT data FROM drafts WHERE conversation_id = ?1 AND expires_at > ?2",
        params![conversation_id, fmt_dt(&now)],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(draft) => Ok(Some(draft)),
            Err(e) => {
                tracing::warn!(conversation = conversation_id, error = %e, "discarding unreadable draft");
                Ok(None)
            }
        },
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Overwrites the whole draft blob; there are no partial-field updates at
/// the storage layer.
pub fn save_draft(conn: &Connection, draft: &ConversationDraft) -> anyhow::Result<()> {
    let data = serde_json::to_string(draft)?;
    conn.execute(
        "INSERT INTO drafts (conversation_id, business_id, data, expires_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(conversation_id) DO UPDATE SET
           business_id = excluded.business_id,
           data = excluded.data,
           expires_at = excluded.expires_at",
        params![
            draft.conversation_id,
            draft.business_id,
            data,
            fmt_dt(&draft.expires_at)
        ],
    )?;
    Ok(())
}

pub fn delete_draft(conn: &Connection, conversation_id: &str) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM drafts WHERE conversation_id = ?1",
        params![conversation_id],
    )?;
    Ok(())
}

pub fn expire_old_drafts(conn: &Connection, now: DateTime<Utc>) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM drafts WHERE expires_at <= ?1",
        params![fmt_dt(&now)],
    )?;
    Ok(count)
}
