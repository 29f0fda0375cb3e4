use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::Slot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DraftStage {
    Idle,
    Offer,
    Confirm,
}

impl DraftStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStage::Idle => "idle",
            DraftStage::Offer => "offer",
            DraftStage::Confirm => "confirm",
        }
    }
}

/// A cancel/reschedule flow waiting on a missing field (usually the phone
/// number) before it can look up the target appointment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    Cancel,
    Reschedule,
}

/// Coarse time-of-day filter used when the customer gives no exact clock
/// time. Windows are half-open over business-local clock time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DayPart {
    Morning,
    Afternoon,
    Evening,
    Before(NaiveTime),
    After(NaiveTime),
}

impl DayPart {
    pub fn contains(&self, time: NaiveTime) -> bool {
        let (start, end) = self.window();
        start <= time && time < end
    }

    fn window(&self) -> (NaiveTime, NaiveTime) {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).expect("valid clock time");
        match self {
            DayPart::Morning => (t(6, 0), t(12, 0)),
            DayPart::Afternoon => (t(12, 0), t(17, 0)),
            DayPart::Evening => (t(17, 0), t(21, 0)),
            DayPart::Before(end) => (NaiveTime::MIN, *end),
            DayPart::After(start) => (*start, t(23, 59)),
        }
    }
}

/// Booking fields the orchestrator still needs, in the stable follow-up
/// order: service, date/time, name, phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Service,
    When,
    Name,
    Phone,
}

impl MissingField {
    pub fn prompt_noun(&self) -> &'static str {
        match self {
            MissingField::Service => "which service you'd like",
            MissingField::When => "a preferred date and time",
            MissingField::Name => "your name",
            MissingField::Phone => "your phone number",
        }
    }
}

/// Per-conversation scratchpad of partially collected booking fields.
/// Persisted wholesale as one JSON blob per conversation; discarded entirely
/// once expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDraft {
    pub conversation_id: String,
    pub business_id: String,
    pub stage: DraftStage,
    pub pending_action: Option<PendingAction>,
    pub service_id: Option<String>,
    pub service_name: Option<String>,
    pub duration_minutes: Option<i64>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub day_part: Option<DayPart>,
    /// Raw text of a time phrase the extractors could not parse; surfaced to
    /// operators, never interpreted by the engine.
    pub time_hint: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub offered: Vec<Slot>,
    pub offered_expires_at: Option<DateTime<Utc>>,
    pub chosen: Option<Slot>,
    pub reschedule_appointment_id: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ConversationDraft {
    pub fn new(
        conversation_id: &str,
        business_id: &str,
        now: DateTime<Utc>,
        ttl_minutes: i64,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            business_id: business_id.to_string(),
            stage: DraftStage::Idle,
            pending_action: None,
            service_id: None,
            service_name: None,
            duration_minutes: None,
            date: None,
            time: None,
            day_part: None,
            time_hint: None,
            customer_name: None,
            customer_phone: None,
            offered: vec![],
            offered_expires_at: None,
            chosen: None,
            reschedule_appointment_id: None,
            last_activity: now,
            expires_at: now + Duration::minutes(ttl_minutes),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Every turn that touches the draft slides its expiry forward.
    pub fn touch(&mut self, now: DateTime<Utc>, ttl_minutes: i64) {
        self.last_activity = now;
        self.expires_at = now + Duration::minutes(ttl_minutes);
    }

    /// Whether the cached offered-slot list is still usable for selection.
    pub fn offers_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.offered.is_empty()
            && self.offered_expires_at.map(|e| now < e).unwrap_or(false)
    }

    /// A comprehensible time request: a chosen slot, or a date/day-part the
    /// calculator can turn into proposals.
    pub fn has_when(&self) -> bool {
        self.chosen.is_some() || self.date.is_some() || self.day_part.is_some()
    }

    pub fn missing_fields(&self) -> Vec<MissingField> {
        let mut missing = vec![];
        if self.service_id.is_none() {
            missing.push(MissingField::Service);
        }
        if !self.has_when() {
            missing.push(MissingField::When);
        }
        if self.customer_name.is_none() {
            missing.push(MissingField::Name);
        }
        if self.customer_phone.is_none() {
            missing.push(MissingField::Phone);
        }
        missing
    }

}
