use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub name: String,
    pub timezone: String,
    pub owner_phone: Option<String>,
}

impl Business {
    /// IANA zone for all open-window arithmetic. An unparseable zone name
    /// falls back to UTC rather than failing the whole turn.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or_else(|_| {
            tracing::warn!(business = %self.id, timezone = %self.timezone, "unknown timezone, using UTC");
            chrono_tz::UTC
        })
    }
}
