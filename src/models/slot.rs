use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A candidate, not-yet-committed time interval. Ephemeral: produced by the
/// availability calculator, held briefly inside a conversation draft, never
/// persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub label: String,
}

impl Slot {
    /// Builds a slot with its business-local human label, e.g.
    /// "Mon 16 Jun 09:00-10:00".
    pub fn labeled(start_at: DateTime<Utc>, end_at: DateTime<Utc>, tz: &Tz) -> Self {
        let start_local = start_at.with_timezone(tz);
        let end_local = end_at.with_timezone(tz);
        let label = format!(
            "{} {}-{}",
            start_local.format("%a %-d %b"),
            start_local.format("%H:%M"),
            end_local.format("%H:%M"),
        );
        Self {
            start_at,
            end_at,
            label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_label_uses_business_local_time() {
        let tz = chrono_tz::America::Sao_Paulo;
        // 12:00 UTC is 09:00 in Sao Paulo (UTC-3)
        let start = Utc.with_ymd_and_hms(2025, 6, 16, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 16, 13, 0, 0).unwrap();
        let slot = Slot::labeled(start, end, &tz);
        assert_eq!(slot.label, "Mon 16 Jun 09:00-10:00");
    }

    #[test]
    fn test_label_single_digit_day() {
        let tz = chrono_tz::UTC;
        let start = Utc.with_ymd_and_hms(2025, 7, 1, 14, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 7, 1, 14, 30, 0).unwrap();
        let slot = Slot::labeled(start, end, &tz);
        assert_eq!(slot.label, "Tue 1 Jul 14:00-14:30");
    }
}
