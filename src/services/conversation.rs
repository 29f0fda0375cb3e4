use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::db::queries;
use crate::extract;
use crate::extract::intent::Intent;
use crate::models::{
    Appointment, AppointmentStatus, BookingPolicy, Business, ConversationDraft, DraftStage,
    MissingField, PendingAction, ServiceItem, Slot,
};
use crate::services::availability::{self, CandidateOutcome, SlotQuery};
use crate::services::dedup;
use crate::services::guard::{self, BookingFields, ClaimOutcome};
use crate::state::AppState;

const DEFAULT_DURATION_MIN: i64 = 60;
const MAX_OFFERED_SLOTS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub business_id: String,
    pub message: String,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Answered,
    InProgress,
    NeedsHuman,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Answered => "answered",
            ConversationStatus::InProgress => "in_progress",
            ConversationStatus::NeedsHuman => "needs_human",
        }
    }
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub status: ConversationStatus,
}

struct TurnContext<'a> {
    db: &'a Connection,
    business: &'a Business,
    policy: &'a BookingPolicy,
    services: &'a [ServiceItem],
    config: &'a AppConfig,
    now: DateTime<Utc>,
}

pub fn handle_turn(state: &AppState, req: &TurnRequest) -> anyhow::Result<Option<TurnOutcome>> {
    handle_turn_at(state, req, Utc::now())
}

/// One inbound utterance, end to end: dedup, draft load with lazy expiry,
/// intent + field extraction, state machine routing, one draft write and at
/// most one appointment write. Returns None when the idempotency layer
/// suppressed a duplicate.
pub fn handle_turn_at(
    state: &AppState,
    req: &TurnRequest,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<TurnOutcome>> {
    let text = req.message.trim();

    if let Some(message_id) = &req.message_id {
        if state.dedup.check_and_record(&dedup::message_key(message_id)) {
            tracing::info!(
                conversation = %req.conversation_id,
                message_id = %message_id,
                "duplicate inbound message, skipping"
            );
            return Ok(None);
        }
    }
    if state
        .dedup
        .check_and_record(&dedup::utterance_key(&req.conversation_id, text))
    {
        tracing::info!(conversation = %req.conversation_id, "already replied to this utterance, skipping");
        return Ok(None);
    }

    // the whole turn runs under the store lock; commits cannot interleave
    let db = state.db.lock().unwrap();
    let _ = queries::expire_old_drafts(&db, now);

    let business = queries::get_business(&db, &req.business_id)?
        .ok_or_else(|| anyhow::anyhow!("unknown business: {}", req.business_id))?;
    let policy = queries::get_policy(&db, &req.business_id)?;
    let services = queries::list_services(&db, &req.business_id)?;

    let mut draft = queries::get_draft(&db, &req.conversation_id, now)?.unwrap_or_else(|| {
        ConversationDraft::new(
            &req.conversation_id,
            &req.business_id,
            now,
            state.config.draft_ttl_minutes,
        )
    });

    let intent = extract::intent::classify(text);
    tracing::info!(
        conversation = %req.conversation_id,
        intent = ?intent,
        stage = draft.stage.as_str(),
        "processing turn"
    );

    merge_extracted(&mut draft, text, intent, &services, &business, now);

    let ctx = TurnContext {
        db: &db,
        business: &business,
        policy: &policy,
        services: &services,
        config: &state.config,
        now,
    };

    let (outcome, keep_draft) = route(&ctx, &mut draft, intent, text)?;

    if keep_draft {
        draft.touch(now, state.config.draft_ttl_minutes);
        queries::save_draft(&db, &draft)?;
    } else {
        queries::delete_draft(&db, &req.conversation_id)?;
    }

    Ok(Some(outcome))
}

/// Merges everything the extractors can read out of the utterance into the
/// draft. Extraction that produced nothing never clears a populated field;
/// a later non-empty value overrides an earlier one.
fn merge_extracted(
    draft: &mut ConversationDraft,
    text: &str,
    intent: Intent,
    services: &[ServiceItem],
    business: &Business,
    now: DateTime<Utc>,
) {
    if let Some(service) = extract::service::resolve(text, services) {
        draft.service_id = Some(service.id.clone());
        draft.service_name = Some(service.name.clone());
        draft.duration_minutes = Some(service.duration_minutes);
    }

    let today_local = now.with_timezone(&business.tz()).date_naive();
    let when = extract::datetime::extract_when(text, today_local);
    if when.date.is_some() || when.time.is_some() || when.day_part.is_some() {
        // a fresh time reference supersedes a previously chosen slot
        draft.chosen = None;
        draft.time_hint = None;
        if when.date.is_some() {
            draft.date = when.date;
        }
        if when.time.is_some() {
            draft.time = when.time;
        }
        if when.day_part.is_some() {
            draft.day_part = when.day_part;
        }
    } else if intent == Intent::Book && !draft.has_when() {
        draft.time_hint = Some(text.to_string());
    }

    if let Some(name) = extract::contact::extract_name(text) {
        draft.customer_name = Some(name);
    }
    if let Some(phone) = extract::contact::extract_phone(text) {
        draft.customer_phone = Some(phone);
    }
}

fn route(
    ctx: &TurnContext,
    draft: &mut ConversationDraft,
    intent: Intent,
    text: &str,
) -> anyhow::Result<(TurnOutcome, bool)> {
    // a cancel phrase during an active booking attempt abandons the draft;
    // cancelling an existing appointment starts from idle
    if intent == Intent::Cancel && draft.stage != DraftStage::Idle && draft.pending_action.is_none()
    {
        return Ok((
            TurnOutcome {
                reply: "No problem, I've dropped that request. Anything else I can help with?"
                    .to_string(),
                status: ConversationStatus::Answered,
            },
            false,
        ));
    }
    if intent == Intent::Cancel || draft.pending_action == Some(PendingAction::Cancel) {
        return cancel_flow(ctx, draft);
    }
    if intent == Intent::Reschedule || draft.pending_action == Some(PendingAction::Reschedule) {
        return reschedule_flow(ctx, draft, text);
    }

    if draft_is_blank(draft)
        && matches!(
            intent,
            Intent::Other | Intent::Confirm | Intent::Decline | Intent::Change
        )
    {
        return Ok((
            TurnOutcome {
                reply: "Hi! I can help you book, reschedule, or cancel an appointment. \
                        Just tell me what you need."
                    .to_string(),
                status: ConversationStatus::Answered,
            },
            false,
        ));
    }

    match (draft.stage, intent) {
        (DraftStage::Confirm, Intent::Confirm) => commit_flow(ctx, draft),
        (DraftStage::Confirm, Intent::Change | Intent::Decline) => {
            // the chosen time goes; service and contact details stay
            draft.chosen = None;
            draft.time = None;
            offer_slots(ctx, draft, "Sure, let's find another time.")
        }
        _ => booking_flow(ctx, draft, text),
    }
}

fn booking_flow(
    ctx: &TurnContext,
    draft: &mut ConversationDraft,
    text: &str,
) -> anyhow::Result<(TurnOutcome, bool)> {
    if draft.chosen.is_none() {
        if let Some(outcome) = try_select_offered(ctx, draft, text)? {
            return Ok(outcome);
        }
    }

    // a customer-named exact time becomes the working candidate only after
    // passing the live acceptance test
    if draft.chosen.is_none() {
        if let (Some(date), Some(time)) = (draft.date, draft.time) {
            match availability::validate_candidate(
                ctx.db,
                ctx.business,
                ctx.policy,
                date,
                time,
                duration_of(draft),
                None,
                ctx.now,
            )? {
                CandidateOutcome::Free { start_at, end_at } => {
                    draft.chosen = Some(Slot::labeled(start_at, end_at, &ctx.business.tz()));
                }
                CandidateOutcome::Rejected(rejection) => {
                    draft.time = None;
                    return offer_slots(ctx, draft, &rejection.to_string());
                }
            }
        }
    }

    let service_known = draft.service_id.is_some() || ctx.services.is_empty();
    if draft.chosen.is_some()
        && service_known
        && draft.customer_name.is_some()
        && draft.customer_phone.is_some()
    {
        draft.stage = DraftStage::Confirm;
        let slot_label = draft
            .chosen
            .as_ref()
            .map(|s| s.label.clone())
            .unwrap_or_default();
        let service = draft.service_name.as_deref().unwrap_or("your appointment");
        let name = draft.customer_name.as_deref().unwrap_or("you");
        return Ok((
            TurnOutcome {
                reply: format!(
                    "To confirm: {service} on {slot_label} for {name}. \
                     Reply YES to book it, or NO for another time."
                ),
                status: ConversationStatus::InProgress,
            },
            true,
        ));
    }

    let missing = draft.missing_fields();

    if missing.contains(&MissingField::Service) && !ctx.services.is_empty() {
        draft.stage = DraftStage::Offer;
        let names: Vec<&str> = ctx.services.iter().map(|s| s.name.as_str()).collect();
        return Ok((
            TurnOutcome {
                reply: format!(
                    "Which service would you like? We offer: {}.",
                    names.join(", ")
                ),
                status: ConversationStatus::InProgress,
            },
            true,
        ));
    }

    if draft.chosen.is_none() {
        if draft.date.is_some() || draft.day_part.is_some() {
            return offer_slots(ctx, draft, "");
        }
        draft.stage = DraftStage::Offer;
        return Ok((
            TurnOutcome {
                reply: "What day and time would work for you?".to_string(),
                status: ConversationStatus::InProgress,
            },
            true,
        ));
    }

    // only the contact fields are left
    draft.stage = DraftStage::Offer;
    let wanted: Vec<&str> = missing
        .iter()
        .filter(|m| matches!(m, MissingField::Name | MissingField::Phone))
        .map(|m| m.prompt_noun())
        .collect();
    let slot_label = draft
        .chosen
        .as_ref()
        .map(|s| s.label.clone())
        .unwrap_or_default();
    Ok((
        TurnOutcome {
            reply: format!(
                "I can do {slot_label}. I just need {} to lock it in.",
                join_natural(&wanted)
            ),
            status: ConversationStatus::InProgress,
        },
        true,
    ))
}

fn commit_flow(
    ctx: &TurnContext,
    draft: &mut ConversationDraft,
) -> anyhow::Result<(TurnOutcome, bool)> {
    let Some(slot) = draft.chosen.clone() else {
        draft.stage = DraftStage::Offer;
        return offer_slots(ctx, draft, "Let's pick the time again.");
    };

    let deposit_required = draft
        .service_id
        .as_deref()
        .and_then(|id| ctx.services.iter().find(|s| s.id == id))
        .map(|s| s.deposit_required)
        .unwrap_or(false);
    let fields = BookingFields {
        service_id: draft.service_id.clone(),
        conversation_id: Some(draft.conversation_id.clone()),
        customer_name: draft.customer_name.clone(),
        customer_phone: draft.customer_phone.clone().unwrap_or_default(),
        deposit_required,
    };

    match guard::claim(ctx.db, ctx.business, ctx.policy, &slot, &fields, ctx.now)? {
        ClaimOutcome::Booked(appointment) => {
            let service = draft.service_name.as_deref().unwrap_or("Your appointment");
            let reply = if appointment.status == AppointmentStatus::Confirmed {
                format!("You're all set! {service} on {}. See you then!", slot.label)
            } else {
                format!(
                    "Request received: {service} on {}. We'll confirm shortly.",
                    slot.label
                )
            };
            Ok((
                TurnOutcome {
                    reply,
                    status: ConversationStatus::Answered,
                },
                false,
            ))
        }
        ClaimOutcome::Overlap => {
            draft.chosen = None;
            draft.time = None;
            offer_slots(ctx, draft, "Sorry, someone just took that time.")
        }
    }
}

fn cancel_flow(
    ctx: &TurnContext,
    draft: &mut ConversationDraft,
) -> anyhow::Result<(TurnOutcome, bool)> {
    draft.pending_action = Some(PendingAction::Cancel);
    draft.stage = DraftStage::Offer;

    let Some(phone) = draft.customer_phone.clone() else {
        return Ok((
            TurnOutcome {
                reply: "Of course. What's the phone number the booking was made under?".to_string(),
                status: ConversationStatus::InProgress,
            },
            true,
        ));
    };

    match queries::find_upcoming_appointment_by_phone(ctx.db, &ctx.business.id, &phone, ctx.now)? {
        Some(appointment) => {
            guard::cancel(ctx.db, &appointment.id, ctx.now)?;
            Ok((
                TurnOutcome {
                    reply: format!(
                        "Done! Your appointment on {} has been cancelled. The team has been notified.",
                        appointment_label(&appointment)
                    ),
                    status: ConversationStatus::NeedsHuman,
                },
                false,
            ))
        }
        None => Ok((
            TurnOutcome {
                reply: "I couldn't find an upcoming appointment under that number. \
                        Could you double-check it?"
                    .to_string(),
                status: ConversationStatus::InProgress,
            },
            true,
        )),
    }
}

fn reschedule_flow(
    ctx: &TurnContext,
    draft: &mut ConversationDraft,
    text: &str,
) -> anyhow::Result<(TurnOutcome, bool)> {
    draft.pending_action = Some(PendingAction::Reschedule);
    draft.stage = DraftStage::Offer;

    let Some(phone) = draft.customer_phone.clone() else {
        return Ok((
            TurnOutcome {
                reply: "Happy to move it. What's the phone number the booking was made under?"
                    .to_string(),
                status: ConversationStatus::InProgress,
            },
            true,
        ));
    };

    let appointment_id = match draft.reschedule_appointment_id.clone() {
        Some(id) => id,
        None => {
            match queries::find_upcoming_appointment_by_phone(
                ctx.db,
                &ctx.business.id,
                &phone,
                ctx.now,
            )? {
                Some(appointment) => {
                    let minutes = (appointment.end_at - appointment.start_at).num_minutes();
                    draft.duration_minutes.get_or_insert(minutes.max(1));
                    draft.reschedule_appointment_id = Some(appointment.id.clone());
                    appointment.id
                }
                None => {
                    return Ok((
                        TurnOutcome {
                            reply: "I couldn't find an upcoming appointment under that number. \
                                    Could you double-check it?"
                                .to_string(),
                            status: ConversationStatus::InProgress,
                        },
                        true,
                    ));
                }
            }
        }
    };

    if draft.chosen.is_none() {
        if let Some(outcome) = try_select_offered(ctx, draft, text)? {
            return Ok(outcome);
        }
    }
    if draft.chosen.is_none() {
        if let (Some(date), Some(time)) = (draft.date, draft.time) {
            match availability::validate_candidate(
                ctx.db,
                ctx.business,
                ctx.policy,
                date,
                time,
                duration_of(draft),
                Some(&appointment_id),
                ctx.now,
            )? {
                CandidateOutcome::Free { start_at, end_at } => {
                    draft.chosen = Some(Slot::labeled(start_at, end_at, &ctx.business.tz()));
                }
                CandidateOutcome::Rejected(rejection) => {
                    draft.time = None;
                    return offer_slots(ctx, draft, &rejection.to_string());
                }
            }
        }
    }

    let Some(slot) = draft.chosen.clone() else {
        if draft.date.is_some() || draft.day_part.is_some() {
            return offer_slots(ctx, draft, "Happy to move it.");
        }
        return Ok((
            TurnOutcome {
                reply: "What new day and time would work for you?".to_string(),
                status: ConversationStatus::InProgress,
            },
            true,
        ));
    };

    match guard::reschedule(ctx.db, ctx.business, ctx.policy, &appointment_id, &slot, ctx.now)? {
        ClaimOutcome::Booked(moved) => Ok((
            TurnOutcome {
                reply: format!(
                    "All moved! Your appointment is now on {}. The team has been notified.",
                    appointment_label(&moved)
                ),
                status: ConversationStatus::NeedsHuman,
            },
            false,
        )),
        ClaimOutcome::Overlap => {
            draft.chosen = None;
            draft.time = None;
            offer_slots(ctx, draft, "Sorry, that new time was just taken.")
        }
    }
}

/// Proposes up to three slots and caches them in the draft for selection.
fn offer_slots(
    ctx: &TurnContext,
    draft: &mut ConversationDraft,
    prefix: &str,
) -> anyhow::Result<(TurnOutcome, bool)> {
    let tz = ctx.business.tz();
    let today_local = ctx.now.with_timezone(&tz).date_naive();
    let query = SlotQuery {
        pivot_date: draft.date.unwrap_or(today_local),
        duration_minutes: duration_of(draft),
        days_horizon: ctx.policy.booking_window_days.max(1),
        max_slots: MAX_OFFERED_SLOTS,
        day_part: draft.day_part,
        exclude_appointment_id: draft.reschedule_appointment_id.clone(),
    };
    let slots = availability::find_slots(ctx.db, ctx.business, ctx.policy, &query, ctx.now)?;

    draft.stage = DraftStage::Offer;
    if slots.is_empty() {
        draft.offered.clear();
        draft.offered_expires_at = None;
        let reply = join_sentences(
            prefix,
            "I couldn't find any openings around then. Could you try another day?",
        );
        return Ok((
            TurnOutcome {
                reply,
                status: ConversationStatus::InProgress,
            },
            true,
        ));
    }

    draft.offered = slots.clone();
    draft.offered_expires_at = Some(ctx.now + Duration::minutes(ctx.config.offer_ttl_minutes));

    let listed: Vec<String> = slots
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}) {}", i + 1, s.label))
        .collect();
    let reply = join_sentences(
        prefix,
        &format!(
            "Here's what we have:\n{}\nReply with a number, or suggest another time.",
            listed.join("\n")
        ),
    );
    Ok((
        TurnOutcome {
            reply,
            status: ConversationStatus::InProgress,
        },
        true,
    ))
}

/// A bare "1" / "option 2" / "the first" reply picks from the offered list.
/// A stale list is refreshed instead of committing to old times.
fn try_select_offered(
    ctx: &TurnContext,
    draft: &mut ConversationDraft,
    text: &str,
) -> anyhow::Result<Option<(TurnOutcome, bool)>> {
    if draft.offered.is_empty() {
        return Ok(None);
    }
    // an utterance carrying its own time reference is a new request, not a
    // pick from the list ("first thing tomorrow morning")
    let today_local = ctx.now.with_timezone(&ctx.business.tz()).date_naive();
    let when = extract::datetime::extract_when(text, today_local);
    if when.date.is_some() || when.time.is_some() || when.day_part.is_some() {
        return Ok(None);
    }
    let Some(index) = ordinal_choice(text, draft.offered.len()) else {
        return Ok(None);
    };

    if !draft.offers_fresh(ctx.now) {
        let outcome = offer_slots(
            ctx,
            draft,
            "Those times may have changed, here's the latest availability.",
        )?;
        return Ok(Some(outcome));
    }

    draft.chosen = Some(draft.offered[index].clone());
    Ok(None)
}

static ORDINAL_DIGIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:the\s+)?(?:option\s*|number\s*|#\s*)?([1-9])\s*\)?\s*(?:please\s*)?$")
        .expect("valid regex")
});
static ORDINAL_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(first|second|third)\b").expect("valid regex"));

fn ordinal_choice(text: &str, offered: usize) -> Option<usize> {
    let number = if let Some(caps) = ORDINAL_DIGIT_RE.captures(text) {
        caps.get(1)?.as_str().parse::<usize>().ok()?
    } else if let Some(caps) = ORDINAL_WORD_RE.captures(text) {
        match caps.get(1)?.as_str().to_lowercase().as_str() {
            "first" => 1,
            "second" => 2,
            _ => 3,
        }
    } else {
        return None;
    };
    (1..=offered).contains(&number).then(|| number - 1)
}

fn draft_is_blank(draft: &ConversationDraft) -> bool {
    draft.stage == DraftStage::Idle
        && draft.pending_action.is_none()
        && draft.chosen.is_none()
        && draft.missing_fields().len() == 4
}

fn duration_of(draft: &ConversationDraft) -> i64 {
    draft.duration_minutes.unwrap_or(DEFAULT_DURATION_MIN)
}

fn appointment_label(appointment: &Appointment) -> String {
    let tz: Tz = appointment.timezone.parse().unwrap_or(chrono_tz::UTC);
    Slot::labeled(appointment.start_at, appointment.end_at, &tz).label
}

fn join_natural(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [only] => only.to_string(),
        [head @ .., last] => format!("{} and {}", head.join(", "), last),
    }
}

fn join_sentences(prefix: &str, rest: &str) -> String {
    if prefix.is_empty() {
        rest.to_string()
    } else {
        format!("{prefix} {rest}")
    }
}
