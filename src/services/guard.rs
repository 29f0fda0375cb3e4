use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

use crate::db::queries;
use crate::models::{Appointment, AppointmentStatus, BookingPolicy, Business, Slot};
use crate::services::availability;

/// Customer-facing fields collected by the conversation before commit.
#[derive(Debug, Clone, Default)]
pub struct BookingFields {
    pub service_id: Option<String>,
    pub conversation_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: String,
    pub deposit_required: bool,
}

#[derive(Debug)]
pub enum ClaimOutcome {
    Booked(Appointment),
    /// The re-check found the interval taken; nothing was written.
    Overlap,
}

/// Atomic claim of a candidate slot. The calculator's view may be stale by
/// the time a human confirms, so the live overlap test is re-run here, under
/// the same store lock that the insert uses — no other writer can interleave.
pub fn claim(
    conn: &Connection,
    business: &Business,
    policy: &BookingPolicy,
    slot: &Slot,
    fields: &BookingFields,
    now: DateTime<Utc>,
) -> anyhow::Result<ClaimOutcome> {
    if overlaps_existing(conn, &business.id, slot.start_at, slot.end_at, policy, None)? {
        tracing::info!(
            business = %business.id,
            slot = %slot.label,
            "claim rejected, interval no longer free"
        );
        return Ok(ClaimOutcome::Overlap);
    }

    let status = if policy.require_confirmation || fields.deposit_required {
        AppointmentStatus::Pending
    } else {
        AppointmentStatus::Confirmed
    };

    let appointment = Appointment {
        id: uuid::Uuid::new_v4().to_string(),
        business_id: business.id.clone(),
        service_id: fields.service_id.clone(),
        conversation_id: fields.conversation_id.clone(),
        customer_name: fields.customer_name.clone(),
        customer_phone: fields.customer_phone.clone(),
        start_at: slot.start_at,
        end_at: slot.end_at,
        timezone: business.timezone.clone(),
        status,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    };
    queries::insert_appointment(conn, &appointment)?;

    tracing::info!(
        business = %business.id,
        appointment = %appointment.id,
        status = appointment.status.as_str(),
        slot = %slot.label,
        "appointment booked"
    );
    Ok(ClaimOutcome::Booked(appointment))
}

/// Same re-check as `claim`, excluding the appointment being moved, then an
/// in-place move: same identity, new interval, status `rescheduled`.
pub fn reschedule(
    conn: &Connection,
    business: &Business,
    policy: &BookingPolicy,
    appointment_id: &str,
    slot: &Slot,
    now: DateTime<Utc>,
) -> anyhow::Result<ClaimOutcome> {
    if overlaps_existing(
        conn,
        &business.id,
        slot.start_at,
        slot.end_at,
        policy,
        Some(appointment_id),
    )? {
        tracing::info!(
            business = %business.id,
            appointment = appointment_id,
            slot = %slot.label,
            "reschedule rejected, interval no longer free"
        );
        return Ok(ClaimOutcome::Overlap);
    }

    if !queries::update_appointment_time(conn, appointment_id, slot.start_at, slot.end_at, now)? {
        anyhow::bail!("appointment {appointment_id} disappeared during reschedule");
    }
    let moved = queries::get_appointment(conn, appointment_id)?
        .ok_or_else(|| anyhow::anyhow!("appointment {appointment_id} missing after reschedule"))?;

    tracing::info!(
        business = %business.id,
        appointment = appointment_id,
        slot = %slot.label,
        "appointment rescheduled"
    );
    Ok(ClaimOutcome::Booked(moved))
}

/// Pure status transition; no interval checks.
pub fn cancel(conn: &Connection, appointment_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
    let cancelled =
        queries::update_appointment_status(conn, appointment_id, &AppointmentStatus::Cancelled, now)?;
    if cancelled {
        tracing::info!(appointment = appointment_id, "appointment cancelled");
    }
    Ok(cancelled)
}

fn overlaps_existing(
    conn: &Connection,
    business_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    policy: &BookingPolicy,
    exclude: Option<&str>,
) -> anyhow::Result<bool> {
    let buffer = Duration::minutes(policy.buffer_min.max(0));
    let busy = queries::list_blocking_appointments(
        conn,
        business_id,
        start - buffer,
        end + buffer,
    )?;
    Ok(availability::conflicts(&busy, start, end, buffer, exclude))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use std::sync::{Arc, Mutex};

    fn setup() -> (Connection, Business, BookingPolicy) {
        let conn = db::init_db(":memory:").unwrap();
        let business = Business {
            id: "biz-1".to_string(),
            name: "Studio Ipanema".to_string(),
            timezone: "America/Sao_Paulo".to_string(),
            owner_phone: None,
        };
        queries::save_business(&conn, &business).unwrap();
        let policy = BookingPolicy::defaults(&business.id);
        (conn, business, policy)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 20, 0, 0).unwrap()
    }

    fn slot(start_h: u32, start_m: u32, minutes: i64) -> Slot {
        let tz: Tz = "America/Sao_Paulo".parse().unwrap();
        let start = Utc.with_ymd_and_hms(2025, 6, 16, start_h, start_m, 0).unwrap();
        Slot::labeled(start, start + Duration::minutes(minutes), &tz)
    }

    fn fields(phone: &str) -> BookingFields {
        BookingFields {
            service_id: Some("svc-1".to_string()),
            conversation_id: Some("conv-1".to_string()),
            customer_name: Some("Alice".to_string()),
            customer_phone: phone.to_string(),
            deposit_required: false,
        }
    }

    #[test]
    fn test_claim_books_free_slot_as_confirmed() {
        let (conn, business, policy) = setup();
        let outcome = claim(&conn, &business, &policy, &slot(12, 0, 60), &fields("555"), now()).unwrap();
        match outcome {
            ClaimOutcome::Booked(appt) => {
                assert_eq!(appt.status, AppointmentStatus::Confirmed);
                assert_eq!(appt.timezone, "America/Sao_Paulo");
                assert!(queries::get_appointment(&conn, &appt.id).unwrap().is_some());
            }
            ClaimOutcome::Overlap => panic!("expected a booking"),
        }
    }

    #[test]
    fn test_claim_is_pending_when_confirmation_required() {
        let (conn, business, mut policy) = setup();
        policy.require_confirmation = true;
        let outcome = claim(&conn, &business, &policy, &slot(12, 0, 60), &fields("555"), now()).unwrap();
        match outcome {
            ClaimOutcome::Booked(appt) => assert_eq!(appt.status, AppointmentStatus::Pending),
            ClaimOutcome::Overlap => panic!("expected a booking"),
        }
    }

    #[test]
    fn test_claim_is_pending_when_deposit_required() {
        let (conn, business, policy) = setup();
        let mut f = fields("555");
        f.deposit_required = true;
        let outcome = claim(&conn, &business, &policy, &slot(12, 0, 60), &f, now()).unwrap();
        match outcome {
            ClaimOutcome::Booked(appt) => assert_eq!(appt.status, AppointmentStatus::Pending),
            ClaimOutcome::Overlap => panic!("expected a booking"),
        }
    }

    #[test]
    fn test_second_claim_on_buffered_neighbour_is_rejected() {
        let (conn, business, policy) = setup();
        assert!(matches!(
            claim(&conn, &business, &policy, &slot(12, 0, 60), &fields("555"), now()).unwrap(),
            ClaimOutcome::Booked(_)
        ));
        // starts exactly at the previous end: gap 0 < 10-minute buffer
        assert!(matches!(
            claim(&conn, &business, &policy, &slot(13, 0, 60), &fields("666"), now()).unwrap(),
            ClaimOutcome::Overlap
        ));
        // a full buffer away is allowed
        assert!(matches!(
            claim(&conn, &business, &policy, &slot(13, 10, 60), &fields("666"), now()).unwrap(),
            ClaimOutcome::Booked(_)
        ));
    }

    #[test]
    fn test_cancelled_appointment_frees_its_slot() {
        let (conn, business, policy) = setup();
        let appt = match claim(&conn, &business, &policy, &slot(12, 0, 60), &fields("555"), now())
            .unwrap()
        {
            ClaimOutcome::Booked(a) => a,
            ClaimOutcome::Overlap => panic!("expected a booking"),
        };

        assert!(cancel(&conn, &appt.id, now()).unwrap());
        let stored = queries::get_appointment(&conn, &appt.id).unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Cancelled);
        assert!(stored.cancelled_at.is_some());

        assert!(matches!(
            claim(&conn, &business, &policy, &slot(12, 0, 60), &fields("666"), now()).unwrap(),
            ClaimOutcome::Booked(_)
        ));
    }

    #[test]
    fn test_reschedule_moves_in_place_and_excludes_itself() {
        let (conn, business, policy) = setup();
        let appt = match claim(&conn, &business, &policy, &slot(12, 0, 60), &fields("555"), now())
            .unwrap()
        {
            ClaimOutcome::Booked(a) => a,
            ClaimOutcome::Overlap => panic!("expected a booking"),
        };

        // overlaps only its own old interval, which does not count
        let target = slot(12, 30, 60);
        let moved = match reschedule(&conn, &business, &policy, &appt.id, &target, now()).unwrap() {
            ClaimOutcome::Booked(a) => a,
            ClaimOutcome::Overlap => panic!("expected the move to succeed"),
        };
        assert_eq!(moved.id, appt.id);
        assert_eq!(moved.status, AppointmentStatus::Rescheduled);
        assert_eq!(moved.start_at, target.start_at);
    }

    #[test]
    fn test_reschedule_onto_other_booking_is_rejected() {
        let (conn, business, policy) = setup();
        let first = match claim(&conn, &business, &policy, &slot(12, 0, 60), &fields("555"), now())
            .unwrap()
        {
            ClaimOutcome::Booked(a) => a,
            ClaimOutcome::Overlap => panic!("expected a booking"),
        };
        assert!(matches!(
            claim(&conn, &business, &policy, &slot(15, 0, 60), &fields("666"), now()).unwrap(),
            ClaimOutcome::Booked(_)
        ));

        assert!(matches!(
            reschedule(&conn, &business, &policy, &first.id, &slot(15, 30, 60), now()).unwrap(),
            ClaimOutcome::Overlap
        ));
        // the original interval is untouched after a rejected move
        let unchanged = queries::get_appointment(&conn, &first.id).unwrap().unwrap();
        assert_eq!(unchanged.start_at, first.start_at);
        assert_eq!(unchanged.status, AppointmentStatus::Confirmed);
    }

    #[test]
    fn test_concurrent_claims_one_wins() {
        let (conn, business, policy) = setup();
        let db = Arc::new(Mutex::new(conn));

        let mut handles = vec![];
        for i in 0..2 {
            let db = Arc::clone(&db);
            let business = business.clone();
            let policy = policy.clone();
            handles.push(std::thread::spawn(move || {
                let conn = db.lock().unwrap();
                let outcome = claim(
                    &conn,
                    &business,
                    &policy,
                    &slot(12, 0, 60),
                    &fields(&format!("55{i}")),
                    now(),
                )
                .unwrap();
                matches!(outcome, ClaimOutcome::Booked(_))
            }));
        }

        let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|b| **b).count(), 1, "exactly one claim must win");
        assert_eq!(results.iter().filter(|b| !**b).count(), 1, "the other must see an overlap");
    }
}
