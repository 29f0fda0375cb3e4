use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Per-business booking rules. Read-only input to the availability
/// calculator; seeded with defaults when a business has no stored row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingPolicy {
    pub business_id: String,
    pub buffer_min: i64,
    pub granularity_min: i64,
    pub min_notice_hours: i64,
    pub max_daily_appointments: Option<i64>,
    pub booking_window_days: i64,
    pub blackout_dates: Vec<NaiveDate>,
    pub allow_same_day: bool,
    pub require_confirmation: bool,
}

impl BookingPolicy {
    pub fn defaults(business_id: &str) -> Self {
        Self {
            business_id: business_id.to_string(),
            buffer_min: 10,
            granularity_min: 30,
            min_notice_hours: 2,
            max_daily_appointments: None,
            booking_window_days: 14,
            blackout_dates: vec![],
            allow_same_day: true,
            require_confirmation: false,
        }
    }

    pub fn is_blackout(&self, date: NaiveDate) -> bool {
        self.blackout_dates.contains(&date)
    }
}
